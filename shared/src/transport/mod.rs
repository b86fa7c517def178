mod error;

pub use error::TransportError;

use std::time::Instant;

use crate::types::PeerId;

/// Delivery class of a transport channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Unreliable,
    UnreliableSequenced,
    Reliable,
    ReliableSequenced,
    ReliableFragmentedSequenced,
}

/// One event drained from the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    Connect(PeerId),
    Data {
        peer: PeerId,
        channel: u8,
        payload: Vec<u8>,
        timestamp: Instant,
    },
    Disconnect(PeerId),
    Nothing,
}

/// Called when the concrete transport cannot provide a requested channel
/// kind; returns the kind to fall back to.
pub type ChannelFallback<'f> = &'f dyn Fn(ChannelKind) -> ChannelKind;

/// The boundary to the concrete network library. The engine core never
/// touches sockets directly; it drains `poll` once per tick and pushes
/// framed payloads through `send`.
pub trait Transport {
    /// Registers a named channel, returning the byte handle messages are
    /// multiplexed onto. `fallback` negotiates a substitute kind when the
    /// transport lacks the requested one.
    fn register_channel(
        &mut self,
        name: &str,
        kind: ChannelKind,
        fallback: ChannelFallback,
    ) -> Result<u8, TransportError>;

    fn poll(&mut self) -> TransportEvent;

    fn send(&mut self, peer: PeerId, payload: &[u8], channel: u8) -> Result<(), TransportError>;

    fn disconnect(&mut self, peer: PeerId);
}
