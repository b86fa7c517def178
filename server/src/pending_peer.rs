use std::time::{Duration, Instant};

/// Where a connecting peer sits in the handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PendingState {
    /// Waiting for the peer's handshake request.
    AwaitingHail,
    /// Waiting for the peer to acknowledge an authenticated hail. Unused
    /// while the security mode is stubbed to "none".
    #[allow(dead_code)]
    AwaitingHandshakeAck,
}

/// A peer the transport has connected but the protocol has not yet
/// approved. Exactly one of these exists per connecting peer; it is
/// removed on approval, rejection, or watchdog timeout.
pub struct PendingPeer {
    pub peer_id: u64,
    pub state: PendingState,
    since: Instant,
}

impl PendingPeer {
    pub fn new(peer_id: u64) -> Self {
        Self {
            peer_id,
            state: PendingState::AwaitingHail,
            since: Instant::now(),
        }
    }

    /// Checked once per scheduler tick; there is no retransmission, an
    /// expired peer must reconnect from scratch.
    pub fn has_expired(&self, timeout: Duration) -> bool {
        self.since.elapsed() >= timeout
    }
}
