use thiserror::Error;

use tether_shared::{NetworkId, ReplicationError, RouterError, RpcError, TransportError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TetherClientError {
    #[error("Client is not connected to a server")]
    NotConnected,

    #[error("This client does not own object {network_id:?} or may not unspawn it")]
    UnspawnNotPermitted { network_id: NetworkId },

    #[error(transparent)]
    Replication(#[from] ReplicationError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
