mod error;
mod host_world;
mod object_record;
mod replication;
mod rpc;

pub use error::{ReplicationError, RpcError};
pub use host_world::HostWorld;
pub use object_record::ObjectRecord;
pub use replication::{ReplicationCommand, ReplicationManager, SpawnOptions};
pub use rpc::{RpcDispatch, RpcHandler, RpcMethodDescriptor, RpcRegistry, RpcTarget};
