use crate::types::NetworkId;

use super::error::ReplicationError;

/// The host engine's side of the replication boundary. A "replicated
/// object" is any engine value the world can instantiate, destroy, and
/// deliver lifecycle callbacks to; the engine binding layer adapts its
/// concrete objects to this interface.
pub trait HostWorld<E: Copy + Eq + std::hash::Hash> {
    /// Creates the local counterpart of a remotely-spawned object from its
    /// type identifier.
    fn instantiate(&mut self, type_hash: u64) -> Result<E, ReplicationError>;

    /// Destroys the underlying engine object.
    fn destroy(&mut self, entity: E);

    /// The object has been connected to its network counterpart(s).
    fn on_object_connected(&mut self, entity: E, network_id: NetworkId);

    /// The object has been disconnected (unspawned).
    fn on_object_disconnected(&mut self, entity: E, network_id: NetworkId);
}
