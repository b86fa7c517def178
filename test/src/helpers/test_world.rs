use std::collections::HashSet;

use tether_shared::{HostWorld, NetworkId, ReplicationError};

/// A minimal host engine: entities are bare `u64` handles.
pub struct TestWorld {
    next_entity: u64,
    pub instantiated: Vec<(u64, u64)>,
    pub destroyed: Vec<u64>,
    pub connected: Vec<(u64, NetworkId)>,
    pub disconnected: Vec<(u64, NetworkId)>,
    fail_types: HashSet<u64>,
}

impl TestWorld {
    pub fn new() -> Self {
        Self {
            next_entity: 1000,
            instantiated: Vec::new(),
            destroyed: Vec::new(),
            connected: Vec::new(),
            disconnected: Vec::new(),
            fail_types: HashSet::new(),
        }
    }

    /// Makes `instantiate` fail for the given type hash.
    pub fn fail_instantiation_of(&mut self, type_hash: u64) {
        self.fail_types.insert(type_hash);
    }

    /// Allocates an engine handle without involving the network.
    pub fn create_entity(&mut self) -> u64 {
        let entity = self.next_entity;
        self.next_entity += 1;
        entity
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl HostWorld<u64> for TestWorld {
    fn instantiate(&mut self, type_hash: u64) -> Result<u64, ReplicationError> {
        if self.fail_types.contains(&type_hash) {
            return Err(ReplicationError::InstantiationFailed { type_hash });
        }
        let entity = self.create_entity();
        self.instantiated.push((entity, type_hash));
        Ok(entity)
    }

    fn destroy(&mut self, entity: u64) {
        self.destroyed.push(entity);
    }

    fn on_object_connected(&mut self, entity: u64, network_id: NetworkId) {
        self.connected.push((entity, network_id));
    }

    fn on_object_disconnected(&mut self, entity: u64, network_id: NetworkId) {
        self.disconnected.push((entity, network_id));
    }
}
