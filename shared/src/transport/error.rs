use thiserror::Error;

use crate::types::PeerId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Channel '{name}' could not be registered")]
    ChannelRegistrationFailed { name: String },

    #[error("Send to peer {peer} failed")]
    SendFailed { peer: PeerId },

    #[error("Peer {peer} is not connected")]
    UnknownPeer { peer: PeerId },
}
