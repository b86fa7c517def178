use std::{
    collections::{HashMap, VecDeque},
    hash::Hash,
    time::Duration,
};

use log::warn;

use crate::{
    hashing::{hash_str, HashSize},
    key_generator::KeyGenerator,
    messages::{AddObjectMessage, DestroyObjectMessage, ObjectSuccessMessage},
    types::{HostType, NetworkId, PeerId, SERVER_PEER_ID},
    world::{error::ReplicationError, host_world::HostWorld, object_record::ObjectRecord},
};

/// Parameters for a server-authored spawn.
pub struct SpawnOptions {
    pub owner: PeerId,
    pub unique_id: Option<String>,
    /// Explicit initial observer list. `None` shows the object to every
    /// currently connected peer and to peers that approve later.
    pub observers: Option<Vec<PeerId>>,
    pub owner_can_unspawn: bool,
    pub destroy_on_unspawn: bool,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            owner: SERVER_PEER_ID,
            unique_id: None,
            observers: None,
            owner_can_unspawn: false,
            destroy_on_unspawn: true,
        }
    }
}

/// Outgoing work produced by the replication tables, drained by the owning
/// node once per tick.
pub enum ReplicationCommand<E: Copy + Eq + Hash> {
    SendSpawn {
        recipients: Vec<PeerId>,
        message: AddObjectMessage,
    },
    SendUnspawn {
        recipients: Vec<PeerId>,
        message: DestroyObjectMessage,
    },
    /// Client-side acknowledgment addressed to the server.
    SendSuccess { message: ObjectSuccessMessage },
    ObjectConnected { network_id: NetworkId, entity: E },
    ObjectDisconnected { network_id: NetworkId, entity: E },
}

struct LocalPendingObject<E> {
    entity: E,
    unique_hash: u64,
}

struct RemotePendingObject {
    message: AddObjectMessage,
}

/// The spawn/match/unspawn state machine.
///
/// A replicated object begins life locally and must be *connected* to its
/// counterpart(s) elsewhere before it is usable across the network. On the
/// server that happens at spawn time; on a client it happens when a local
/// registration and a remote spawn message meet, in whichever order they
/// arrive.
pub struct ReplicationManager<E: Copy + Eq + Hash> {
    host_type: HostType,
    hash_size: HashSize,
    id_generator: KeyGenerator<NetworkId>,
    connected: HashMap<NetworkId, ObjectRecord<E>>,
    unique_to_id: HashMap<u64, NetworkId>,
    // hash -> the string that claimed it, kept to tell an exact duplicate
    // from a genuine hash collision
    unique_sources: HashMap<u64, String>,
    local_pending: HashMap<u64, LocalPendingObject<E>>,
    remote_pending: HashMap<u64, RemotePendingObject>,
    remote_pending_ids: HashMap<NetworkId, u64>,
    instantiating: bool,
    deferred_spawns: VecDeque<AddObjectMessage>,
    commands: VecDeque<ReplicationCommand<E>>,
}

impl<E: Copy + Eq + Hash> ReplicationManager<E> {
    pub fn new(host_type: HostType, hash_size: HashSize, id_recycle_delay: Duration) -> Self {
        Self {
            host_type,
            hash_size,
            id_generator: KeyGenerator::new(id_recycle_delay),
            connected: HashMap::new(),
            unique_to_id: HashMap::new(),
            unique_sources: HashMap::new(),
            local_pending: HashMap::new(),
            remote_pending: HashMap::new(),
            remote_pending_ids: HashMap::new(),
            instantiating: false,
            deferred_spawns: VecDeque::new(),
            commands: VecDeque::new(),
        }
    }

    // Accessors

    pub fn record(&self, network_id: NetworkId) -> Option<&ObjectRecord<E>> {
        self.connected.get(&network_id)
    }

    pub fn record_mut(&mut self, network_id: NetworkId) -> Option<&mut ObjectRecord<E>> {
        self.connected.get_mut(&network_id)
    }

    pub fn is_owner(&self, network_id: NetworkId, peer: PeerId) -> bool {
        self.connected
            .get(&network_id)
            .is_some_and(|record| record.owner == peer)
    }

    pub fn connected_count(&self) -> usize {
        self.connected.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.local_pending.is_empty() || !self.remote_pending.is_empty()
    }

    pub fn take_commands(&mut self) -> VecDeque<ReplicationCommand<E>> {
        std::mem::take(&mut self.commands)
    }

    // Unique hash claims

    fn claim_unique(&mut self, unique_id: &str) -> Result<u64, ReplicationError> {
        let hash = hash_str(unique_id, self.hash_size);
        if let Some(existing) = self.unique_sources.get(&hash) {
            if existing == unique_id {
                return Err(ReplicationError::DuplicateUniqueId {
                    unique_id: unique_id.to_string(),
                });
            }
            return Err(ReplicationError::UniqueHashCollision {
                first: existing.clone(),
                second: unique_id.to_string(),
            });
        }
        self.unique_sources.insert(hash, unique_id.to_string());
        Ok(hash)
    }

    fn release_unique(&mut self, hash: u64) {
        self.unique_to_id.remove(&hash);
        self.unique_sources.remove(&hash);
    }

    // Server-authored spawns

    /// Allocates a NetworkId, claims the unique id if any, registers the
    /// record, and queues spawn messages for the initial observers.
    pub fn server_spawn(
        &mut self,
        world: &mut dyn HostWorld<E>,
        entity: E,
        type_hash: u64,
        options: SpawnOptions,
        connected_peers: &[PeerId],
    ) -> Result<NetworkId, ReplicationError> {
        if self.host_type != HostType::Server {
            return Err(ReplicationError::ServerAuthorityRequired);
        }

        let unique_hash = match &options.unique_id {
            Some(unique_id) => Some(self.claim_unique(unique_id)?),
            None => None,
        };

        let network_id = self.id_generator.generate();
        debug_assert!(!self.connected.contains_key(&network_id));

        let visible_to_new_peers = options.observers.is_none();
        let recipients: Vec<PeerId> = options
            .observers
            .unwrap_or_else(|| connected_peers.to_vec())
            .into_iter()
            .filter(|peer| *peer != SERVER_PEER_ID)
            .collect();

        let mut record = ObjectRecord {
            entity,
            network_id,
            owner: options.owner,
            type_hash,
            unique_hash,
            observers: Default::default(),
            pending_observers: Default::default(),
            owner_can_unspawn: options.owner_can_unspawn,
            destroy_on_unspawn: options.destroy_on_unspawn,
            visible_to_new_peers,
        };
        for peer in &recipients {
            record.add_pending_observer(*peer);
        }

        let message = Self::spawn_message(&record);
        if let Some(hash) = unique_hash {
            self.unique_to_id.insert(hash, network_id);
        }
        self.connected.insert(network_id, record);

        world.on_object_connected(entity, network_id);
        self.commands
            .push_back(ReplicationCommand::ObjectConnected { network_id, entity });
        if !recipients.is_empty() {
            self.commands
                .push_back(ReplicationCommand::SendSpawn { recipients, message });
        }

        Ok(network_id)
    }

    fn spawn_message(record: &ObjectRecord<E>) -> AddObjectMessage {
        AddObjectMessage {
            network_id: record.network_id,
            owner: record.owner,
            type_hash: record.type_hash,
            unique_hash: record.unique_hash,
            owner_can_unspawn: record.owner_can_unspawn,
            destroy_on_unspawn: record.destroy_on_unspawn,
        }
    }

    // Client-side matching

    /// Registers a locally-created object under a developer-supplied
    /// unique id. If the server's spawn message for that id already
    /// arrived, the pair is connected immediately; otherwise the object
    /// waits in the local pending table.
    pub fn client_register(
        &mut self,
        world: &mut dyn HostWorld<E>,
        entity: E,
        unique_id: &str,
    ) -> Result<(), ReplicationError> {
        let hash = self.claim_unique(unique_id)?;

        if let Some(remote) = self.remote_pending.remove(&hash) {
            self.remote_pending_ids.remove(&remote.message.network_id);
            self.connect_object(world, entity, &remote.message);
        } else {
            self.local_pending.insert(
                hash,
                LocalPendingObject {
                    entity,
                    unique_hash: hash,
                },
            );
        }
        Ok(())
    }

    /// Tears down a registration that never connected. Skips any network
    /// traffic; there is nothing remote to tear down yet.
    pub fn unregister_pending(&mut self, unique_id: &str) -> Result<(), ReplicationError> {
        let hash = hash_str(unique_id, self.hash_size);
        let Some(pending) = self.local_pending.remove(&hash) else {
            return Err(ReplicationError::UnknownNetworkId {
                network_id: NetworkId::new(0),
            });
        };
        self.release_unique(pending.unique_hash);
        Ok(())
    }

    /// Processes an incoming spawn message. Reentrant calls made while an
    /// instantiation is in flight are queued and drained afterwards, so a
    /// constructor-time spawn cannot corrupt the pending tables.
    pub fn handle_add_object(
        &mut self,
        world: &mut dyn HostWorld<E>,
        message: AddObjectMessage,
    ) -> Result<(), ReplicationError> {
        if self.instantiating {
            self.deferred_spawns.push_back(message);
            return Ok(());
        }

        let result = self.process_add_object(world, message);

        while let Some(deferred) = self.deferred_spawns.pop_front() {
            if let Err(error) = self.process_add_object(world, deferred) {
                warn!("deferred spawn failed: {error}");
            }
        }

        result
    }

    fn process_add_object(
        &mut self,
        world: &mut dyn HostWorld<E>,
        message: AddObjectMessage,
    ) -> Result<(), ReplicationError> {
        if self.connected.contains_key(&message.network_id) {
            // late duplicate, an expected race
            warn!(
                "dropping spawn for already-connected object {:?}",
                message.network_id
            );
            return Ok(());
        }

        match message.unique_hash {
            Some(hash) => {
                if let Some(local) = self.local_pending.remove(&hash) {
                    self.connect_object(world, local.entity, &message);
                    Ok(())
                } else if self.remote_pending.contains_key(&hash) {
                    Err(ReplicationError::DuplicateRemotePending { unique_hash: hash })
                } else {
                    self.remote_pending_ids.insert(message.network_id, hash);
                    self.remote_pending
                        .insert(hash, RemotePendingObject { message });
                    Ok(())
                }
            }
            None => {
                // dynamic spawn driven entirely by the server
                self.instantiating = true;
                let instantiated = world.instantiate(message.type_hash);
                self.instantiating = false;

                let entity = instantiated?;
                self.connect_object(world, entity, &message);
                Ok(())
            }
        }
    }

    fn connect_object(&mut self, world: &mut dyn HostWorld<E>, entity: E, message: &AddObjectMessage) {
        let record = ObjectRecord {
            entity,
            network_id: message.network_id,
            owner: message.owner,
            type_hash: message.type_hash,
            unique_hash: message.unique_hash,
            observers: Default::default(),
            pending_observers: Default::default(),
            owner_can_unspawn: message.owner_can_unspawn,
            destroy_on_unspawn: message.destroy_on_unspawn,
            visible_to_new_peers: false,
        };
        if let Some(hash) = message.unique_hash {
            self.unique_to_id.insert(hash, message.network_id);
        }
        self.connected.insert(message.network_id, record);

        world.on_object_connected(entity, message.network_id);
        self.commands.push_back(ReplicationCommand::ObjectConnected {
            network_id: message.network_id,
            entity,
        });
        self.commands.push_back(ReplicationCommand::SendSuccess {
            message: ObjectSuccessMessage {
                network_id: message.network_id,
            },
        });
    }

    /// Server-side: records a peer's object-success acknowledgment,
    /// promoting it from pending observer to observer. Returns whether a
    /// promotion happened.
    pub fn handle_object_success(&mut self, peer: PeerId, network_id: NetworkId) -> bool {
        match self.connected.get_mut(&network_id) {
            Some(record) => {
                if record.promote_observer(peer) {
                    true
                } else {
                    warn!(
                        "object-success from peer {peer} which was not pending on {:?}",
                        network_id
                    );
                    false
                }
            }
            None => {
                warn!("object-success for stale object {:?}", network_id);
                false
            }
        }
    }

    // Unspawn

    /// Authoritative unspawn. Permitted for the server itself and for the
    /// owning peer when the record allows owner unspawns.
    pub fn server_unspawn(
        &mut self,
        world: &mut dyn HostWorld<E>,
        network_id: NetworkId,
        requested_by: PeerId,
        destroy: bool,
    ) -> Result<(), ReplicationError> {
        if self.host_type != HostType::Server {
            return Err(ReplicationError::ServerAuthorityRequired);
        }
        let Some(record) = self.connected.get(&network_id) else {
            return Err(ReplicationError::UnknownNetworkId { network_id });
        };
        let authorized = requested_by == SERVER_PEER_ID
            || (requested_by == record.owner && record.owner_can_unspawn);
        if !authorized {
            return Err(ReplicationError::UnauthorizedUnspawn {
                peer: requested_by,
                network_id,
            });
        }

        let record = self
            .connected
            .remove(&network_id)
            .expect("record presence was just checked");
        if let Some(hash) = record.unique_hash {
            self.release_unique(hash);
        }
        self.id_generator.recycle_key(&network_id);

        let recipients = record.all_observers();
        if !recipients.is_empty() {
            self.commands.push_back(ReplicationCommand::SendUnspawn {
                recipients,
                message: DestroyObjectMessage { network_id, destroy },
            });
        }

        world.on_object_disconnected(record.entity, network_id);
        if destroy && record.destroy_on_unspawn {
            world.destroy(record.entity);
        }
        self.commands.push_back(ReplicationCommand::ObjectDisconnected {
            network_id,
            entity: record.entity,
        });
        Ok(())
    }

    /// Server-side: an engine object vanished without an unspawn. Treated
    /// as an implicit unspawn; the engine object itself is already gone so
    /// no destroy callback fires.
    pub fn object_destroyed_externally(&mut self, network_id: NetworkId) {
        let Some(record) = self.connected.remove(&network_id) else {
            return;
        };
        warn!(
            "object {:?} was destroyed without an unspawn; cleaning up implicitly",
            network_id
        );
        if let Some(hash) = record.unique_hash {
            self.release_unique(hash);
        }
        self.id_generator.recycle_key(&network_id);

        let recipients = record.all_observers();
        if !recipients.is_empty() {
            self.commands.push_back(ReplicationCommand::SendUnspawn {
                recipients,
                message: DestroyObjectMessage {
                    network_id,
                    destroy: true,
                },
            });
        }
        self.commands.push_back(ReplicationCommand::ObjectDisconnected {
            network_id,
            entity: record.entity,
        });
    }

    /// Client-side: the server tore the object down.
    pub fn handle_destroy_object(
        &mut self,
        world: &mut dyn HostWorld<E>,
        message: DestroyObjectMessage,
    ) {
        let Some(record) = self.connected.remove(&message.network_id) else {
            // the object may still be waiting for its local counterpart
            if let Some(hash) = self.remote_pending_ids.remove(&message.network_id) {
                self.remote_pending.remove(&hash);
                warn!(
                    "unspawn for object {:?} arrived before it ever matched",
                    message.network_id
                );
            } else {
                warn!(
                    "dropping unspawn for unknown object {:?}",
                    message.network_id
                );
            }
            return;
        };
        if let Some(hash) = record.unique_hash {
            self.release_unique(hash);
        }

        world.on_object_disconnected(record.entity, message.network_id);
        if message.destroy && record.destroy_on_unspawn {
            world.destroy(record.entity);
        }
        self.commands.push_back(ReplicationCommand::ObjectDisconnected {
            network_id: message.network_id,
            entity: record.entity,
        });
    }

    // Visibility

    /// Queues a spawn for one peer that cannot currently see the object.
    pub fn show(&mut self, peer: PeerId, network_id: NetworkId) -> Result<(), ReplicationError> {
        if peer == SERVER_PEER_ID {
            return Err(ReplicationError::CannotTargetServer);
        }
        let Some(record) = self.connected.get_mut(&network_id) else {
            return Err(ReplicationError::UnknownNetworkId { network_id });
        };
        if record.is_observer(peer) || record.is_pending_observer(peer) {
            warn!("peer {peer} already observes {:?}", network_id);
            return Ok(());
        }
        record.add_pending_observer(peer);
        let message = Self::spawn_message(record);
        self.commands.push_back(ReplicationCommand::SendSpawn {
            recipients: vec![peer],
            message,
        });
        Ok(())
    }

    /// Sends an unspawn to a single peer and forgets it ever observed the
    /// object. The server's own observation can never be hidden.
    pub fn hide(&mut self, peer: PeerId, network_id: NetworkId) -> Result<(), ReplicationError> {
        if peer == SERVER_PEER_ID {
            return Err(ReplicationError::CannotTargetServer);
        }
        let Some(record) = self.connected.get_mut(&network_id) else {
            return Err(ReplicationError::UnknownNetworkId { network_id });
        };
        if !record.is_observer(peer) && !record.is_pending_observer(peer) {
            warn!("peer {peer} does not observe {:?}", network_id);
            return Ok(());
        }
        record.remove_observer(peer);
        self.commands.push_back(ReplicationCommand::SendUnspawn {
            recipients: vec![peer],
            message: DestroyObjectMessage {
                network_id,
                destroy: true,
            },
        });
        Ok(())
    }

    /// Server-side: replays spawn messages to a freshly-approved peer for
    /// every object flagged visible to new peers.
    pub fn new_peer_catchup(&mut self, peer: PeerId) {
        let mut messages = Vec::new();
        for record in self.connected.values_mut() {
            if record.visible_to_new_peers
                && !record.is_observer(peer)
                && !record.is_pending_observer(peer)
            {
                record.add_pending_observer(peer);
                messages.push(Self::spawn_message(record));
            }
        }
        for message in messages {
            self.commands.push_back(ReplicationCommand::SendSpawn {
                recipients: vec![peer],
                message,
            });
        }
    }

    // Ownership

    /// Rewrites the owner of a record, returning the peers that must be
    /// told. Server-initiated only; request validation happens above.
    pub fn set_owner(
        &mut self,
        network_id: NetworkId,
        new_owner: PeerId,
    ) -> Result<Vec<PeerId>, ReplicationError> {
        let Some(record) = self.connected.get_mut(&network_id) else {
            return Err(ReplicationError::UnknownNetworkId { network_id });
        };
        record.owner = new_owner;
        Ok(record.all_observers())
    }

    // Peer lifecycle

    /// Removes a departed peer from every observer and pending-observer
    /// set. Must run in the same tick as the disconnect.
    pub fn purge_peer(&mut self, peer: PeerId) {
        for record in self.connected.values_mut() {
            record.remove_observer(peer);
        }
    }
}
