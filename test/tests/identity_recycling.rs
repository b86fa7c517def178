//! NetworkId lifecycle properties: uniqueness among live objects and
//! quarantine of released ids.

use std::time::{Duration, Instant};

use proptest::prelude::*;

use tether_shared::{
    HashSize, HostType, ReplicationManager, SpawnOptions, SERVER_PEER_ID,
};
use tether_test::helpers::TestWorld;

fn manager(recycle_delay: Duration) -> ReplicationManager<u64> {
    ReplicationManager::new(HostType::Server, HashSize::B64, recycle_delay)
}

proptest! {
    /// Under any interleaving of spawns and unspawns, a NetworkId is never
    /// attached to two live records at once while the quarantine holds.
    #[test]
    fn live_ids_are_always_unique(ops in prop::collection::vec(any::<bool>(), 1..200)) {
        let mut world = TestWorld::new();
        let mut replication = manager(Duration::from_secs(60));
        let mut live = Vec::new();
        let mut ever_issued = std::collections::HashSet::new();

        for spawn in ops {
            if spawn || live.is_empty() {
                let entity = world.create_entity();
                let network_id = replication
                    .server_spawn(&mut world, entity, 1, SpawnOptions::default(), &[])
                    .unwrap();
                // never reissued while the quarantine is still running
                prop_assert!(
                    ever_issued.insert(network_id),
                    "id {network_id:?} issued twice inside the recycle delay"
                );
                live.push(network_id);
            } else {
                let network_id = live.swap_remove(live.len() / 2);
                replication
                    .server_unspawn(&mut world, network_id, SERVER_PEER_ID, false)
                    .unwrap();
            }
        }
    }
}

#[test]
fn released_id_returns_only_after_the_recycle_delay() {
    let delay = Duration::from_millis(20);
    let mut world = TestWorld::new();
    let mut replication = manager(delay);

    let entity = world.create_entity();
    let first = replication
        .server_spawn(&mut world, entity, 1, SpawnOptions::default(), &[])
        .unwrap();
    let released_at = Instant::now();
    replication
        .server_unspawn(&mut world, first, SERVER_PEER_ID, false)
        .unwrap();

    // spin until the id comes back, recording when
    loop {
        let entity = world.create_entity();
        let id = replication
            .server_spawn(&mut world, entity, 1, SpawnOptions::default(), &[])
            .unwrap();
        if id == first {
            let elapsed = released_at.elapsed();
            assert!(
                elapsed >= delay,
                "id reissued after {elapsed:?}, before the {delay:?} delay"
            );
            break;
        }
        replication
            .server_unspawn(&mut world, id, SERVER_PEER_ID, false)
            .unwrap();
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn implicit_unspawn_recycles_the_id_too() {
    let mut world = TestWorld::new();
    let mut replication = manager(Duration::from_millis(0));

    let entity = world.create_entity();
    let network_id = replication
        .server_spawn(&mut world, entity, 1, SpawnOptions::default(), &[])
        .unwrap();

    // the engine object vanished without an unspawn
    replication.object_destroyed_externally(network_id);
    assert!(replication.record(network_id).is_none());

    // with a zero delay the id is immediately reusable
    let entity = world.create_entity();
    let reissued = replication
        .server_spawn(&mut world, entity, 1, SpawnOptions::default(), &[])
        .unwrap();
    assert_eq!(reissued, network_id);
}
