use thiserror::Error;

use crate::types::{NetworkId, PeerId};

/// Errors raised by the replication tables. The duplicate/collision
/// variants are consistency violations: the operation is aborted loudly and
/// existing state is never overwritten.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplicationError {
    #[error("Unique id '{unique_id}' is already registered")]
    DuplicateUniqueId { unique_id: String },

    #[error("Unique ids '{first}' and '{second}' hash to the same value")]
    UniqueHashCollision { first: String, second: String },

    #[error("No replicated object with NetworkId {network_id:?}")]
    UnknownNetworkId { network_id: NetworkId },

    #[error("Peer {peer} is not authorized to unspawn NetworkId {network_id:?}")]
    UnauthorizedUnspawn { peer: PeerId, network_id: NetworkId },

    #[error("Operation requires server authority")]
    ServerAuthorityRequired,

    #[error("The server's own observation of an object cannot be changed")]
    CannotTargetServer,

    #[error("The host world failed to instantiate type {type_hash:#x}")]
    InstantiationFailed { type_hash: u64 },

    #[error("Spawn message for hash {unique_hash:#x} is already buffered")]
    DuplicateRemotePending { unique_hash: u64 },
}

/// Errors raised by RPC registration and dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    #[error("RPC methods '{first}' and '{second}' hash to the same value")]
    MethodHashCollision { first: String, second: String },

    #[error("RPC registration is closed once the node is running")]
    RegistrationClosed,

    #[error("No RPC table registered for type {type_hash:#x}")]
    UnknownType { type_hash: u64 },

    #[error("No RPC method with hash {method_hash:#x} on type {type_hash:#x}")]
    UnknownMethod { type_hash: u64, method_hash: u64 },

    #[error("RPC handler for '{name}' failed")]
    HandlerFailed { name: String },
}
