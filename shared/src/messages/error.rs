use thiserror::Error;

use crate::types::PeerId;

/// Errors surfaced by the message router. `PendingPeerViolation` is the
/// only variant that must cost the sender its connection; the rest drop
/// the offending message and leave the connection up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    #[error("Received message with the reserved INVALID type")]
    InvalidMessageType,

    #[error("Received message with unregistered type {value}")]
    UnknownMessageType { value: u8 },

    #[error("Message '{name}' is out of scope for this node")]
    ScopeViolation { name: String },

    #[error("Pending peer {peer} sent non-handshake message '{name}'")]
    PendingPeerViolation { peer: PeerId, name: String },

    #[error("Message registration is closed once the node is running")]
    RegistrationClosed,

    #[error("Message type {value} cannot be carried by the 6-bit wire field")]
    UnencodableType { value: u8 },

    #[error("Custom handler for '{name}' failed")]
    HandlerFailed { name: String },
}
