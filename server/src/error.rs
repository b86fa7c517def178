use thiserror::Error;

use tether_shared::{PeerId, ReplicationError, RouterError, RpcError, TransportError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TetherServerError {
    #[error("Server is not listening")]
    NotListening,

    #[error("Peer {peer} is not connected")]
    PeerNotConnected { peer: PeerId },

    #[error(transparent)]
    Replication(#[from] ReplicationError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
