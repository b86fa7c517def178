use std::{
    collections::{HashMap, HashSet},
    hash::Hash,
    time::{Duration, Instant},
};

use log::{info, warn};

use tether_shared::{
    BitReader, BitWrite, BitWriter, ChangeOwnerMessage, ConnectionApprovedMessage,
    ConnectionRequestMessage, DestroyObjectMessage, EnvelopeHeader, HandlerScope, HostType,
    HostWorld, MessageRouter, MessageType, NetworkId, NetworkTime, ObjectSuccessMessage,
    Protocol, ReplicationCommand, ReplicationError, ReplicationManager, RouteDecision,
    RouterError, RpcHandler, RpcMessage, RpcRegistry, RpcTarget, Serde, SpawnOptions,
    TimeSyncMessage, Transport, TransportEvent, CustomHandler, PeerId, SERVER_PEER_ID,
};

use crate::{
    error::TetherServerError,
    events::{Events, ServerEvent, ServerModule},
    pending_peer::{PendingPeer, PendingState},
    server_config::ServerConfig,
};

/// Which connected peers an outbound RPC is delivered to. Peers that do
/// not observe the target object are skipped regardless.
#[derive(Clone, Debug)]
pub enum RpcRecipients {
    One(PeerId),
    All,
    AllExcept(PeerId),
    Peers(Vec<PeerId>),
}

fn send_framed<M: Serde>(
    transport: &mut dyn Transport,
    peer: PeerId,
    message_type: MessageType,
    message: &M,
    channel: u8,
) {
    let mut writer = BitWriter::new();
    EnvelopeHeader::new(message_type).ser(&mut writer);
    message.ser(&mut writer);
    let bytes = writer.to_bytes();
    if let Err(error) = transport.send(peer, &bytes, channel) {
        warn!("send to peer {peer} failed: {error}");
    }
}

/// The authoritative node. Drives the handshake state machine for every
/// connecting peer, owns the NetworkId space, and fans replicated-object
/// state out to approved clients.
///
/// Everything runs inside [`tick`](Server::tick); nothing blocks and no
/// state is shared across threads.
pub struct Server<E: Copy + Eq + Hash> {
    config: ServerConfig,
    protocol: Protocol,
    router: MessageRouter,
    rpcs: RpcRegistry<E>,
    replication: ReplicationManager<E>,
    transport: Option<Box<dyn Transport>>,
    reliable_channel: u8,
    unreliable_channel: u8,
    pending_peers: HashMap<PeerId, PendingPeer>,
    peers: HashSet<PeerId>,
    modules: Vec<Box<dyn ServerModule>>,
    time: NetworkTime,
    resync_accumulator: Duration,
    last_tick: Instant,
    events: Events<E>,
}

impl<E: Copy + Eq + Hash> Server<E> {
    /// Create a new Server
    pub fn new<P: Into<Protocol>>(config: ServerConfig, protocol: P) -> Self {
        let protocol: Protocol = protocol.into();
        let replication = ReplicationManager::new(
            HostType::Server,
            protocol.rpc_hash_size,
            config.connection.id_recycle_delay,
        );
        let rpcs = RpcRegistry::new(protocol.rpc_hash_size);
        Self {
            config,
            protocol,
            router: MessageRouter::new(HostType::Server),
            rpcs,
            replication,
            transport: None,
            reliable_channel: 0,
            unreliable_channel: 0,
            pending_peers: HashMap::new(),
            peers: HashSet::new(),
            modules: Vec::new(),
            time: NetworkTime::new(),
            resync_accumulator: Duration::ZERO,
            last_tick: Instant::now(),
            events: Events::default(),
        }
    }

    // Startup

    /// Registers an application message. Only legal before `listen`.
    pub fn register_message(
        &mut self,
        name: &str,
        scope: HandlerScope,
        handler: CustomHandler,
    ) -> Result<MessageType, TetherServerError> {
        Ok(self.router.register_custom(name, scope, handler)?)
    }

    /// Registers a remote-callable method for a replicated-object type.
    /// Only legal before `listen`.
    pub fn register_rpc(
        &mut self,
        type_hash: u64,
        name: &str,
        signature: Option<&str>,
        target: RpcTarget,
        requires_ownership: bool,
        handler: RpcHandler<E>,
    ) -> Result<u64, TetherServerError> {
        Ok(self
            .rpcs
            .register_method(type_hash, name, signature, target, requires_ownership, handler)?)
    }

    /// Registers an extension module. Only legal before `listen`.
    pub fn register_module(&mut self, module: Box<dyn ServerModule>) {
        self.modules.push(module);
    }

    /// Begin listening over the given transport. Closes message and RPC
    /// registration and freezes the protocol fingerprint.
    pub fn listen(&mut self, mut transport: Box<dyn Transport>) -> Result<(), TetherServerError> {
        use tether_shared::ChannelKind;

        self.reliable_channel = transport.register_channel(
            "tether_internal",
            ChannelKind::ReliableFragmentedSequenced,
            &|_| ChannelKind::ReliableSequenced,
        )?;
        self.unreliable_channel = transport.register_channel(
            "tether_time_sync",
            ChannelKind::Unreliable,
            &|_| ChannelKind::UnreliableSequenced,
        )?;

        if !self.protocol.is_locked() {
            self.protocol.lock();
        }
        self.router.lock();
        self.rpcs.lock();
        self.transport = Some(transport);
        self.last_tick = Instant::now();
        info!("server listening");
        Ok(())
    }

    pub fn is_listening(&self) -> bool {
        self.transport.is_some()
    }

    // Tick

    /// Must be called regularly. Drains a bounded number of transport
    /// events, runs the handshake watchdog and periodic housekeeping, and
    /// flushes outgoing replication work. Returns the tick's events.
    pub fn tick(&mut self, world: &mut dyn HostWorld<E>) -> Events<E> {
        let Some(mut transport) = self.transport.take() else {
            return std::mem::take(&mut self.events);
        };

        let now = Instant::now();
        let delta = now.duration_since(self.last_tick);
        self.last_tick = now;

        // transport events are drained before anything else, so a flood
        // cannot starve the watchdog
        let max_events = self.config.connection.max_events_per_tick;
        let mut drained = 0usize;
        loop {
            if max_events != 0 && drained >= max_events {
                break;
            }
            match transport.poll() {
                TransportEvent::Nothing => break,
                TransportEvent::Connect(peer) => self.handle_connect(peer),
                TransportEvent::Data { peer, payload, .. } => {
                    self.handle_data(transport.as_mut(), world, peer, &payload);
                }
                TransportEvent::Disconnect(peer) => self.handle_disconnect(peer),
            }
            drained += 1;
        }

        self.check_handshake_timeouts(transport.as_mut());

        // accumulator-style: missed intervals are compensated, not lost
        let resync_interval = self.config.connection.time_resync_interval;
        if !resync_interval.is_zero() {
            self.resync_accumulator += delta;
            while self.resync_accumulator >= resync_interval {
                self.resync_accumulator -= resync_interval;
                self.broadcast_time_sync(transport.as_mut());
            }
        }

        self.flush_replication(transport.as_mut());

        self.transport = Some(transport);
        std::mem::take(&mut self.events)
    }

    fn handle_connect(&mut self, peer: PeerId) {
        if self.peers.contains(&peer) || self.pending_peers.contains_key(&peer) {
            warn!("connect event for already-known peer {peer}");
            return;
        }
        self.pending_peers.insert(peer, PendingPeer::new(peer));
    }

    fn handle_disconnect(&mut self, peer: PeerId) {
        let was_pending = self.pending_peers.remove(&peer).is_some();
        let was_live = self.peers.remove(&peer);
        if !was_pending && !was_live {
            return;
        }

        // the whole purge happens inside this tick; a peer is never
        // partially removed
        self.replication.purge_peer(peer);

        if was_live {
            for module in &mut self.modules {
                module.peer_disconnected(peer);
            }
            self.events.push(ServerEvent::Disconnection(peer));
        }
    }

    fn force_disconnect(&mut self, transport: &mut dyn Transport, peer: PeerId) {
        transport.disconnect(peer);
        self.handle_disconnect(peer);
    }

    fn check_handshake_timeouts(&mut self, transport: &mut dyn Transport) {
        let timeout = self.config.connection.handshake_timeout;
        let expired: Vec<PeerId> = self
            .pending_peers
            .values()
            .filter(|pending| pending.has_expired(timeout))
            .map(|pending| pending.peer_id)
            .collect();
        for peer in expired {
            warn!("peer {peer} timed out during handshake");
            self.pending_peers.remove(&peer);
            transport.disconnect(peer);
        }
    }

    fn broadcast_time_sync(&mut self, transport: &mut dyn Transport) {
        let mut peer_ids: Vec<PeerId> = self.peers.iter().copied().collect();
        // shuffle to avoid giving any peer a standing latency advantage
        fastrand::shuffle(&mut peer_ids);

        let message = TimeSyncMessage {
            server_time: self.time.now(),
        };
        for peer in peer_ids {
            send_framed(
                transport,
                peer,
                MessageType::TIME_SYNC,
                &message,
                self.unreliable_channel,
            );
        }
    }

    // Message dispatch

    fn handle_data(
        &mut self,
        transport: &mut dyn Transport,
        world: &mut dyn HostWorld<E>,
        peer: PeerId,
        payload: &[u8],
    ) {
        let mut reader = BitReader::new(payload);
        let header = match EnvelopeHeader::de(&mut reader) {
            Ok(header) => header,
            Err(_) => {
                warn!("malformed envelope from peer {peer}");
                return;
            }
        };
        if header.encrypted || header.authenticated {
            warn!("peer {peer} set reserved security bits");
            return;
        }

        let pending = self.pending_peers.contains_key(&peer);
        match self.router.route(peer, pending, &header, &mut reader) {
            Ok(RouteDecision::Handled) => {}
            Ok(RouteDecision::Builtin(message_type)) => {
                self.dispatch_builtin(transport, world, peer, message_type, &mut reader);
            }
            Err(RouterError::PendingPeerViolation { peer, name }) => {
                warn!("dropping pending peer {peer} for premature '{name}'");
                self.pending_peers.remove(&peer);
                transport.disconnect(peer);
            }
            Err(error) => {
                warn!("dropping message from peer {peer}: {error}");
            }
        }
    }

    fn dispatch_builtin(
        &mut self,
        transport: &mut dyn Transport,
        world: &mut dyn HostWorld<E>,
        peer: PeerId,
        message_type: MessageType,
        reader: &mut BitReader,
    ) {
        match message_type {
            MessageType::CONNECTION_REQUEST => {
                self.handle_connection_request(transport, peer, reader);
            }
            MessageType::OBJECT_SUCCESS => match ObjectSuccessMessage::de(reader) {
                Ok(message) => {
                    self.replication.handle_object_success(peer, message.network_id);
                }
                Err(_) => warn!("malformed object-success from peer {peer}"),
            },
            MessageType::DESTROY_OBJECT => {
                self.handle_client_unspawn(transport, world, peer, reader);
            }
            MessageType::CHANGE_OWNER_REQUEST => {
                self.handle_change_owner_request(transport, peer, reader);
            }
            MessageType::SERVER_RPC => {
                self.handle_server_rpc(world, peer, reader);
            }
            other => {
                warn!("builtin {other:?} unexpected on the server");
            }
        }
    }

    // Handshake

    fn handle_connection_request(
        &mut self,
        transport: &mut dyn Transport,
        peer: PeerId,
        reader: &mut BitReader,
    ) {
        let Some(pending) = self.pending_peers.get(&peer) else {
            warn!("connection request from non-pending peer {peer}");
            return;
        };
        if pending.state != PendingState::AwaitingHail {
            warn!("connection request from peer {peer} in {:?}", pending.state);
            return;
        }

        let message = match ConnectionRequestMessage::de(reader) {
            Ok(message) => message,
            Err(_) => {
                warn!("malformed connection request from peer {peer}");
                return;
            }
        };

        if message.fingerprint != self.protocol.fingerprint() {
            // configuration mismatch is fatal and non-retryable
            warn!("peer {peer} has an incompatible configuration; rejecting");
            self.pending_peers.remove(&peer);
            transport.disconnect(peer);
            return;
        }

        self.pending_peers.remove(&peer);
        self.peers.insert(peer);
        for module in &mut self.modules {
            module.peer_connected(peer);
        }

        // best-effort; an unreliable drop here is corrected by the
        // periodic resync
        self.broadcast_time_sync(transport);

        let approved = ConnectionApprovedMessage {
            assigned_peer_id: peer,
            server_time: self.time.now(),
            reserved: 0,
        };
        send_framed(
            transport,
            peer,
            MessageType::CONNECTION_APPROVED,
            &approved,
            self.reliable_channel,
        );

        self.replication.new_peer_catchup(peer);
        self.flush_replication(transport);

        info!("peer {peer} approved");
        self.events.push(ServerEvent::Connection(peer));
    }

    // Replication

    /// Spawns a server-authored replicated object.
    pub fn spawn_object(
        &mut self,
        world: &mut dyn HostWorld<E>,
        entity: E,
        type_hash: u64,
        options: SpawnOptions,
    ) -> Result<NetworkId, TetherServerError> {
        let connected: Vec<PeerId> = self.peers.iter().copied().collect();
        Ok(self
            .replication
            .server_spawn(world, entity, type_hash, options, &connected)?)
    }

    /// Authoritatively unspawns an object, notifying every observer.
    pub fn unspawn_object(
        &mut self,
        world: &mut dyn HostWorld<E>,
        network_id: NetworkId,
        destroy: bool,
    ) -> Result<(), TetherServerError> {
        Ok(self
            .replication
            .server_unspawn(world, network_id, SERVER_PEER_ID, destroy)?)
    }

    /// Records that an engine object vanished without an unspawn; cleans
    /// up as an implicit unspawn.
    pub fn object_destroyed_externally(&mut self, network_id: NetworkId) {
        self.replication.object_destroyed_externally(network_id);
    }

    /// Makes an object visible to one approved peer. The peer observes it
    /// for real only after its object-success acknowledgment arrives.
    pub fn network_show(
        &mut self,
        peer: PeerId,
        network_id: NetworkId,
    ) -> Result<(), TetherServerError> {
        if !self.peers.contains(&peer) {
            return Err(TetherServerError::PeerNotConnected { peer });
        }
        Ok(self.replication.show(peer, network_id)?)
    }

    /// Hides an object from one peer, unspawning it there.
    pub fn network_hide(
        &mut self,
        peer: PeerId,
        network_id: NetworkId,
    ) -> Result<(), TetherServerError> {
        if peer != SERVER_PEER_ID && !self.peers.contains(&peer) {
            return Err(TetherServerError::PeerNotConnected { peer });
        }
        Ok(self.replication.hide(peer, network_id)?)
    }

    /// Server-initiated ownership transfer.
    pub fn change_owner(
        &mut self,
        network_id: NetworkId,
        new_owner: PeerId,
    ) -> Result<(), TetherServerError> {
        if new_owner != SERVER_PEER_ID && !self.peers.contains(&new_owner) {
            return Err(TetherServerError::PeerNotConnected { peer: new_owner });
        }
        let recipients = self.replication.set_owner(network_id, new_owner)?;
        let message = ChangeOwnerMessage {
            network_id,
            new_owner,
        };
        if let Some(transport) = self.transport.as_deref_mut() {
            for peer in recipients {
                send_framed(
                    transport,
                    peer,
                    MessageType::CHANGE_OWNER,
                    &message,
                    self.reliable_channel,
                );
            }
        }
        self.events.push(ServerEvent::OwnerChanged {
            network_id,
            new_owner,
        });
        Ok(())
    }

    fn handle_client_unspawn(
        &mut self,
        transport: &mut dyn Transport,
        world: &mut dyn HostWorld<E>,
        peer: PeerId,
        reader: &mut BitReader,
    ) {
        let message = match DestroyObjectMessage::de(reader) {
            Ok(message) => message,
            Err(_) => {
                warn!("malformed unspawn from peer {peer}");
                return;
            }
        };
        match self
            .replication
            .server_unspawn(world, message.network_id, peer, message.destroy)
        {
            Ok(()) => {}
            Err(ReplicationError::UnknownNetworkId { network_id }) => {
                // expected race against a server-side unspawn
                warn!("unspawn from peer {peer} for stale object {network_id:?}");
            }
            Err(ReplicationError::UnauthorizedUnspawn { .. }) => {
                warn!("peer {peer} attempted an unauthorized unspawn; disconnecting");
                self.force_disconnect(transport, peer);
            }
            Err(error) => warn!("unspawn from peer {peer} failed: {error}"),
        }
    }

    fn handle_change_owner_request(
        &mut self,
        transport: &mut dyn Transport,
        peer: PeerId,
        reader: &mut BitReader,
    ) {
        let message = match ChangeOwnerMessage::de(reader) {
            Ok(message) => message,
            Err(_) => {
                warn!("malformed owner-change request from peer {peer}");
                return;
            }
        };

        // a client may only hand ownership back to the server
        if message.new_owner != SERVER_PEER_ID {
            warn!(
                "peer {peer} requested owner change to {}; disconnecting",
                message.new_owner
            );
            self.force_disconnect(transport, peer);
            return;
        }
        let Some(record) = self.replication.record(message.network_id) else {
            warn!("owner-change request for stale object {:?}", message.network_id);
            return;
        };
        if record.owner != peer {
            warn!("peer {peer} requested owner change on an object it does not own; disconnecting");
            self.force_disconnect(transport, peer);
            return;
        }

        let recipients = match self.replication.set_owner(message.network_id, SERVER_PEER_ID) {
            Ok(recipients) => recipients,
            Err(error) => {
                warn!("owner-change failed: {error}");
                return;
            }
        };
        let broadcast = ChangeOwnerMessage {
            network_id: message.network_id,
            new_owner: SERVER_PEER_ID,
        };
        for recipient in recipients {
            send_framed(
                transport,
                recipient,
                MessageType::CHANGE_OWNER,
                &broadcast,
                self.reliable_channel,
            );
        }
        self.events.push(ServerEvent::OwnerChanged {
            network_id: message.network_id,
            new_owner: SERVER_PEER_ID,
        });
    }

    // RPC

    /// Invokes a remote-callable method. Server-target methods
    /// short-circuit in-process; client-target methods are delivered to
    /// the given recipients, filtered to actual observers.
    pub fn invoke_rpc(
        &mut self,
        world: &mut dyn HostWorld<E>,
        network_id: NetworkId,
        method_hash: u64,
        args: Vec<u8>,
        recipients: RpcRecipients,
    ) -> Result<(), TetherServerError> {
        let Some(record) = self.replication.record(network_id) else {
            return Err(TetherServerError::Replication(
                ReplicationError::UnknownNetworkId { network_id },
            ));
        };
        let type_hash = record.type_hash;
        let entity = record.entity;
        let owner = record.owner;

        let Some(target) = self.rpcs.target_of(type_hash, method_hash) else {
            return Err(TetherServerError::Rpc(tether_shared::RpcError::UnknownMethod {
                type_hash,
                method_hash,
            }));
        };

        match target {
            RpcTarget::ServerOnly => {
                // the caller is the receiver; skip the wire entirely
                let mut reader = BitReader::new(&args);
                self.rpcs.dispatch(
                    world,
                    entity,
                    HostType::Server,
                    type_hash,
                    method_hash,
                    SERVER_PEER_ID,
                    owner == SERVER_PEER_ID,
                    &mut reader,
                )?;
            }
            RpcTarget::ClientOnly => {
                let resolved = {
                    let record = self
                        .replication
                        .record(network_id)
                        .expect("record presence was just checked");
                    match &recipients {
                        RpcRecipients::All => record.observers.iter().copied().collect(),
                        RpcRecipients::One(peer) => {
                            if record.is_observer(*peer) {
                                vec![*peer]
                            } else {
                                Vec::new()
                            }
                        }
                        RpcRecipients::AllExcept(excluded) => record
                            .observers
                            .iter()
                            .copied()
                            .filter(|peer| peer != excluded)
                            .collect(),
                        RpcRecipients::Peers(list) => list
                            .iter()
                            .copied()
                            .filter(|peer| record.is_observer(*peer))
                            .collect::<Vec<PeerId>>(),
                    }
                };
                let message = RpcMessage {
                    network_id,
                    method_hash,
                    args,
                };
                if let Some(transport) = self.transport.as_deref_mut() {
                    for peer in resolved {
                        send_framed(
                            transport,
                            peer,
                            MessageType::CLIENT_RPC,
                            &message,
                            self.reliable_channel,
                        );
                    }
                }
            }
        }
        Ok(())
    }

    fn handle_server_rpc(
        &mut self,
        world: &mut dyn HostWorld<E>,
        peer: PeerId,
        reader: &mut BitReader,
    ) {
        let message = match RpcMessage::de(reader) {
            Ok(message) => message,
            Err(_) => {
                warn!("malformed RPC from peer {peer}");
                return;
            }
        };
        let Some(record) = self.replication.record(message.network_id) else {
            warn!("RPC from peer {peer} for stale object {:?}", message.network_id);
            return;
        };
        let entity = record.entity;
        let type_hash = record.type_hash;
        let sender_is_owner = record.owner == peer;

        let mut args = BitReader::new(&message.args);
        if let Err(error) = self.rpcs.dispatch(
            world,
            entity,
            HostType::Server,
            type_hash,
            message.method_hash,
            peer,
            sender_is_owner,
            &mut args,
        ) {
            warn!("RPC from peer {peer} dropped: {error}");
        }
    }

    fn flush_replication(&mut self, transport: &mut dyn Transport) {
        for command in self.replication.take_commands() {
            match command {
                ReplicationCommand::SendSpawn {
                    recipients,
                    message,
                } => {
                    for peer in recipients {
                        send_framed(
                            transport,
                            peer,
                            MessageType::ADD_OBJECT,
                            &message,
                            self.reliable_channel,
                        );
                    }
                }
                ReplicationCommand::SendUnspawn {
                    recipients,
                    message,
                } => {
                    for peer in recipients {
                        send_framed(
                            transport,
                            peer,
                            MessageType::DESTROY_OBJECT,
                            &message,
                            self.reliable_channel,
                        );
                    }
                }
                ReplicationCommand::SendSuccess { .. } => {
                    warn!("object-success queued on the server; ignoring");
                }
                ReplicationCommand::ObjectConnected { network_id, entity } => {
                    self.events
                        .push(ServerEvent::ObjectConnected { network_id, entity });
                }
                ReplicationCommand::ObjectDisconnected { network_id, entity } => {
                    self.events
                        .push(ServerEvent::ObjectDisconnected { network_id, entity });
                }
            }
        }
    }

    // Custom messages

    /// Sends an application-registered message to one connected peer. The
    /// payload bytes are handed to the remote handler as-is.
    pub fn send_message(
        &mut self,
        peer: PeerId,
        message_type: MessageType,
        payload: &[u8],
    ) -> Result<(), TetherServerError> {
        if !self.peers.contains(&peer) {
            return Err(TetherServerError::PeerNotConnected { peer });
        }
        let channel = self.reliable_channel;
        let Some(transport) = self.transport.as_deref_mut() else {
            return Err(TetherServerError::NotListening);
        };
        let mut writer = BitWriter::new();
        EnvelopeHeader::new(message_type).ser(&mut writer);
        for byte in payload {
            writer.write_byte(*byte);
        }
        let bytes = writer.to_bytes();
        transport.send(peer, &bytes, channel)?;
        Ok(())
    }

    // Accessors

    /// Return a list of all currently connected peers
    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.peers.iter().copied().collect()
    }

    pub fn peers_count(&self) -> usize {
        self.peers.len()
    }

    pub fn has_peer(&self, peer: PeerId) -> bool {
        self.peers.contains(&peer)
    }

    pub fn is_pending(&self, peer: PeerId) -> bool {
        self.pending_peers.contains_key(&peer)
    }

    pub fn object_record(&self, network_id: NetworkId) -> Option<&tether_shared::ObjectRecord<E>> {
        self.replication.record(network_id)
    }

    /// Current network time in seconds since the server started.
    pub fn network_time(&self) -> f32 {
        self.time.now()
    }

    /// Explicitly disconnects a peer, purging it from every table within
    /// this call.
    pub fn disconnect_peer(&mut self, peer: PeerId) {
        if let Some(transport) = self.transport.as_deref_mut() {
            transport.disconnect(peer);
        }
        self.handle_disconnect(peer);
    }
}
