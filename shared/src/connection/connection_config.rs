use std::time::Duration;

/// Local connection tuning. None of these fields participate in the
/// compatibility fingerprint; peers may disagree on them freely.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// How long a peer may sit in the pending set before the watchdog
    /// force-disconnects it. There is no handshake retransmission; a lost
    /// approval simply times out.
    pub handshake_timeout: Duration,
    /// Interval between best-effort time-sync broadcasts.
    pub time_resync_interval: Duration,
    /// Maximum transport events drained per tick. `0` means unlimited.
    pub max_events_per_tick: usize,
    /// How long a released NetworkId is quarantined before reuse.
    pub id_recycle_delay: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            time_resync_interval: Duration::from_secs(30),
            max_events_per_tick: 0,
            id_recycle_delay: Duration::from_secs(60),
        }
    }
}
