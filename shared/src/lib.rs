//! # Tether Shared
//! Common functionality shared between tether-server & tether-client crates.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

pub use tether_serde::{
    read_delta_bytes, write_delta_bytes, BitReader, BitWrite, BitWriter, Serde, SerdeErr,
    SignedInteger, SignedVariableInteger, UnsignedInteger, UnsignedVariableInteger,
};

mod connection;
mod hashing;
mod key_generator;
mod messages;
mod net_time;
mod protocol;
mod transport;
mod types;
mod world;

pub use connection::{ConnectionConfig, EnvelopeHeader};
pub use hashing::{fnv1a, hash_str, HashSize};
pub use key_generator::KeyGenerator;
pub use messages::{
    AddObjectMessage, ChangeOwnerMessage, ConnectionApprovedMessage, ConnectionRequestMessage,
    CustomHandler, DestroyObjectMessage, MessageRouter, MessageType, ObjectSuccessMessage,
    RouteDecision, RouterError, RpcMessage, TimeSyncMessage,
};
pub use net_time::NetworkTime;
pub use protocol::{ConfigFingerprint, Protocol, ProtocolError};
pub use transport::{ChannelFallback, ChannelKind, Transport, TransportError, TransportEvent};
pub use types::{HandlerScope, HostType, NetworkId, PeerId, SERVER_PEER_ID};
pub use world::{
    HostWorld, ObjectRecord, ReplicationCommand, ReplicationError, ReplicationManager,
    RpcDispatch, RpcError, RpcHandler, RpcMethodDescriptor, RpcRegistry, RpcTarget,
    SpawnOptions,
};
