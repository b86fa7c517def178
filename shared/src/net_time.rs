use std::time::Instant;

/// Shared network clock, expressed as f32 seconds since the server
/// started. The server reads it directly; a client layers on an offset
/// computed from the handshake round trip and refined by periodic
/// time-sync broadcasts.
pub struct NetworkTime {
    epoch: Instant,
    offset: f32,
}

impl NetworkTime {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            offset: 0.0,
        }
    }

    /// Current network time in seconds.
    pub fn now(&self) -> f32 {
        self.epoch.elapsed().as_secs_f32() + self.offset
    }

    /// Re-anchors the clock against an authoritative server time plus half
    /// the estimated round trip.
    pub fn sync(&mut self, server_time: f32, rtt_estimate: f32) {
        let local = self.epoch.elapsed().as_secs_f32();
        self.offset = server_time + rtt_estimate / 2.0 - local;
    }
}

impl Default for NetworkTime {
    fn default() -> Self {
        Self::new()
    }
}
