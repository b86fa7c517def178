use std::{
    collections::VecDeque,
    marker::PhantomData,
    time::{Duration, Instant},
};

/// Allocates monotonically-increasing keys and recycles released ones.
///
/// A released key becomes eligible for reuse only after `recycle_delay` has
/// elapsed, so a stale in-flight reference to a just-released key cannot be
/// confused with a brand-new allocation.
pub struct KeyGenerator<K: From<u64> + Into<u64> + Copy> {
    recycle_delay: Duration,
    recycled_keys: VecDeque<(u64, Instant)>,
    next_key: u64,
    phantom: PhantomData<K>,
}

impl<K: From<u64> + Into<u64> + Copy> KeyGenerator<K> {
    pub fn new(recycle_delay: Duration) -> Self {
        Self {
            recycle_delay,
            recycled_keys: VecDeque::new(),
            next_key: 0,
            phantom: PhantomData,
        }
    }

    /// Gets a new, unused key.
    pub fn generate(&mut self) -> K {
        if let Some((_, timestamp)) = self.recycled_keys.front() {
            if timestamp.elapsed() >= self.recycle_delay {
                // front of the queue is always the oldest release
                let (value, _) = self
                    .recycled_keys
                    .pop_front()
                    .expect("front was just checked");
                return K::from(value);
            }
        }

        let value = self.next_key;
        self.next_key = self.next_key.wrapping_add(1);
        K::from(value)
    }

    /// Returns a released key to the pool, stamped with the current time.
    pub fn recycle_key(&mut self, key: &K) {
        self.recycled_keys
            .push_back(((*key).into(), Instant::now()));
    }
}
