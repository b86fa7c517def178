use std::{hash::Hash, time::Instant};

use log::{info, warn};

use tether_shared::{
    AddObjectMessage, BitReader, BitWrite, BitWriter, ChangeOwnerMessage, ConnectionApprovedMessage,
    ConnectionRequestMessage, CustomHandler, DestroyObjectMessage, EnvelopeHeader, HandlerScope,
    HostType, HostWorld, MessageRouter, MessageType, NetworkId, NetworkTime, Protocol,
    ReplicationCommand, ReplicationManager, RouteDecision, RouterError, RpcHandler, RpcMessage,
    RpcRegistry, RpcTarget, Serde, TimeSyncMessage, Transport, TransportEvent, PeerId,
    SERVER_PEER_ID,
};

use crate::{
    client_config::ClientConfig,
    error::TetherClientError,
    events::{ClientEvent, ClientEvents},
};

/// Where the client sits in its connection lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    /// The transport link is up but no handshake request has gone out.
    Connected,
    SentHandshakeRequest,
    Approved,
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
        warn!("send to server failed: {error}");
    }
}

/// The connecting node. Sends a handshake request as soon as the transport
/// link comes up, adopts the identifier the server assigns, and keeps a
/// local mirror of every replicated object the server shows it.
pub struct Client<E: Copy + Eq + Hash> {
    config: ClientConfig,
    protocol: Protocol,
    router: MessageRouter,
    rpcs: RpcRegistry<E>,
    replication: ReplicationManager<E>,
    transport: Option<Box<dyn Transport>>,
    reliable_channel: u8,
    state: ClientState,
    /// Transport identity of the server link; distinct from the reserved
    /// placeholder id.
    server_peer: Option<PeerId>,
    assigned_peer_id: Option<PeerId>,
    request_sent_at: Option<Instant>,
    rtt_estimate: f32,
    time: NetworkTime,
    events: ClientEvents<E>,
}

impl<E: Copy + Eq + Hash> Client<E> {
    /// Create a new Client
    pub fn new<P: Into<Protocol>>(config: ClientConfig, protocol: P) -> Self {
        let protocol: Protocol = protocol.into();
        let replication = ReplicationManager::new(
            HostType::Client,
            protocol.rpc_hash_size,
            config.connection.id_recycle_delay,
        );
        let rpcs = RpcRegistry::new(protocol.rpc_hash_size);
        Self {
            config,
            protocol,
            router: MessageRouter::new(HostType::Client),
            rpcs,
            replication,
            transport: None,
            reliable_channel: 0,
            state: ClientState::Disconnected,
            server_peer: None,
            assigned_peer_id: None,
            request_sent_at: None,
            rtt_estimate: 0.0,
            time: NetworkTime::new(),
            events: ClientEvents::default(),
        }
    }

    // Startup

    /// Registers an application message. Only legal before `connect`.
    pub fn register_message(
        &mut self,
        name: &str,
        scope: HandlerScope,
        handler: CustomHandler,
    ) -> Result<MessageType, TetherClientError> {
        Ok(self.router.register_custom(name, scope, handler)?)
    }

    /// Registers a remote-callable method for a replicated-object type.
    /// Only legal before `connect`.
    pub fn register_rpc(
        &mut self,
        type_hash: u64,
        name: &str,
        signature: Option<&str>,
        target: RpcTarget,
        requires_ownership: bool,
        handler: RpcHandler<E>,
    ) -> Result<u64, TetherClientError> {
        Ok(self
            .rpcs
            .register_method(type_hash, name, signature, target, requires_ownership, handler)?)
    }

    /// Connect over the given transport. The handshake request goes out
    /// once the transport reports its link up.
    pub fn connect(&mut self, mut transport: Box<dyn Transport>) -> Result<(), TetherClientError> {
        use tether_shared::ChannelKind;

        self.reliable_channel = transport.register_channel(
            "tether_internal",
            ChannelKind::ReliableFragmentedSequenced,
            &|_| ChannelKind::ReliableSequenced,
        )?;
        transport.register_channel("tether_time_sync", ChannelKind::Unreliable, &|_| {
            ChannelKind::UnreliableSequenced
        })?;

        if !self.protocol.is_locked() {
            self.protocol.lock();
        }
        self.router.lock();
        self.rpcs.lock();
        self.transport = Some(transport);
        Ok(())
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ClientState::Approved
    }

    /// The server-assigned peer identifier, available once approved.
    pub fn peer_id(&self) -> Option<PeerId> {
        self.assigned_peer_id
    }

    /// Current network time in seconds, offset against the server clock.
    pub fn network_time(&self) -> f32 {
        self.time.now()
    }

    // Tick

    /// Must be called regularly. Drains a bounded number of transport
    /// events, runs the handshake watchdog, and flushes pending
    /// acknowledgments. Returns the tick's events.
    pub fn tick(&mut self, world: &mut dyn HostWorld<E>) -> ClientEvents<E> {
        let Some(mut transport) = self.transport.take() else {
            return std::mem::take(&mut self.events);
        };

        let max_events = self.config.connection.max_events_per_tick;
        let mut drained = 0usize;
        loop {
            if max_events != 0 && drained >= max_events {
                break;
            }
            match transport.poll() {
                TransportEvent::Nothing => break,
                TransportEvent::Connect(peer) => {
                    self.handle_link_up(transport.as_mut(), peer);
                }
                TransportEvent::Data { peer, payload, .. } => {
                    self.handle_data(world, peer, &payload);
                }
                TransportEvent::Disconnect(peer) => {
                    if Some(peer) == self.server_peer {
                        self.reset_connection();
                    }
                }
            }
            drained += 1;
        }

        // watchdog: a lost approval is not retransmitted, it times out
        if self.state == ClientState::SentHandshakeRequest {
            let expired = self
                .request_sent_at
                .is_some_and(|sent| sent.elapsed() >= self.config.connection.handshake_timeout);
            if expired {
                warn!("handshake timed out; disconnecting");
                if let Some(server) = self.server_peer {
                    transport.disconnect(server);
                }
                self.reset_connection();
            }
        }

        self.flush_replication(transport.as_mut());

        self.transport = Some(transport);
        std::mem::take(&mut self.events)
    }

    fn handle_link_up(&mut self, transport: &mut dyn Transport, server_peer: PeerId) {
        if self.state != ClientState::Disconnected {
            warn!("transport link came up twice");
            return;
        }
        self.state = ClientState::Connected;
        self.server_peer = Some(server_peer);

        let request = ConnectionRequestMessage {
            fingerprint: self.protocol.fingerprint(),
        };
        send_framed(
            transport,
            server_peer,
            MessageType::CONNECTION_REQUEST,
            &request,
            self.reliable_channel,
        );
        self.state = ClientState::SentHandshakeRequest;
        self.request_sent_at = Some(Instant::now());
    }

    fn reset_connection(&mut self) {
        let was_up = self.state != ClientState::Disconnected;
        self.state = ClientState::Disconnected;
        self.server_peer = None;
        self.assigned_peer_id = None;
        self.request_sent_at = None;
        if was_up {
            self.events.push(ClientEvent::Disconnection);
        }
    }

    /// Explicitly drops the link to the server.
    pub fn disconnect(&mut self) {
        if let (Some(transport), Some(server)) = (self.transport.as_deref_mut(), self.server_peer)
        {
            transport.disconnect(server);
        }
        self.reset_connection();
    }

    // Message dispatch

    fn handle_data(&mut self, world: &mut dyn HostWorld<E>, peer: PeerId, payload: &[u8]) {
        if Some(peer) != self.server_peer {
            warn!("data from unknown peer {peer}");
            return;
        }

        let mut reader = BitReader::new(payload);
        let header = match EnvelopeHeader::de(&mut reader) {
            Ok(header) => header,
            Err(_) => {
                warn!("malformed envelope from server");
                return;
            }
        };
        if header.encrypted || header.authenticated {
            warn!("server set reserved security bits");
            return;
        }

        let pending = self.state != ClientState::Approved;
        match self.router.route(peer, pending, &header, &mut reader) {
            Ok(RouteDecision::Handled) => {}
            Ok(RouteDecision::Builtin(message_type)) => {
                self.dispatch_builtin(world, message_type, &mut reader);
            }
            Err(RouterError::PendingPeerViolation { name, .. }) => {
                warn!("server sent '{name}' before approval; ignoring");
            }
            Err(error) => {
                warn!("dropping message from server: {error}");
            }
        }
    }

    fn dispatch_builtin(
        &mut self,
        world: &mut dyn HostWorld<E>,
        message_type: MessageType,
        reader: &mut BitReader,
    ) {
        match message_type {
            MessageType::CONNECTION_APPROVED => self.handle_connection_approved(reader),
            MessageType::ADD_OBJECT => match AddObjectMessage::de(reader) {
                Ok(message) => {
                    if let Err(error) = self.replication.handle_add_object(world, message) {
                        warn!("spawn handling failed: {error}");
                    }
                }
                Err(_) => warn!("malformed spawn message"),
            },
            MessageType::DESTROY_OBJECT => match DestroyObjectMessage::de(reader) {
                Ok(message) => self.replication.handle_destroy_object(world, message),
                Err(_) => warn!("malformed unspawn message"),
            },
            MessageType::TIME_SYNC => match TimeSyncMessage::de(reader) {
                Ok(message) => self.time.sync(message.server_time, self.rtt_estimate),
                Err(_) => warn!("malformed time-sync message"),
            },
            MessageType::CHANGE_OWNER => match ChangeOwnerMessage::de(reader) {
                Ok(message) => match self
                    .replication
                    .set_owner(message.network_id, message.new_owner)
                {
                    Ok(_) => self.events.push(ClientEvent::OwnerChanged {
                        network_id: message.network_id,
                        new_owner: message.new_owner,
                    }),
                    Err(error) => warn!("owner change dropped: {error}"),
                },
                Err(_) => warn!("malformed owner-change message"),
            },
            MessageType::CLIENT_RPC => self.handle_client_rpc(world, reader),
            other => {
                warn!("builtin {other:?} unexpected on the client");
            }
        }
    }

    fn handle_connection_approved(&mut self, reader: &mut BitReader) {
        if self.state != ClientState::SentHandshakeRequest {
            warn!("unexpected approval in {:?}", self.state);
            return;
        }
        let message = match ConnectionApprovedMessage::de(reader) {
            Ok(message) => message,
            Err(_) => {
                warn!("malformed approval message");
                return;
            }
        };

        self.assigned_peer_id = Some(message.assigned_peer_id);
        self.rtt_estimate = self
            .request_sent_at
            .map(|sent| sent.elapsed().as_secs_f32())
            .unwrap_or(0.0);
        self.time.sync(message.server_time, self.rtt_estimate);
        self.state = ClientState::Approved;

        info!("connected as peer {}", message.assigned_peer_id);
        self.events
            .push(ClientEvent::Connection(message.assigned_peer_id));
    }

    fn handle_client_rpc(&mut self, world: &mut dyn HostWorld<E>, reader: &mut BitReader) {
        let message = match RpcMessage::de(reader) {
            Ok(message) => message,
            Err(_) => {
                warn!("malformed RPC message");
                return;
            }
        };
        let Some(record) = self.replication.record(message.network_id) else {
            warn!("RPC for stale object {:?}", message.network_id);
            return;
        };
        let entity = record.entity;
        let type_hash = record.type_hash;
        // client-bound RPCs originate from the server
        let sender_is_owner = record.owner == SERVER_PEER_ID;

        let mut args = BitReader::new(&message.args);
        if let Err(error) = self.rpcs.dispatch(
            world,
            entity,
            HostType::Client,
            type_hash,
            message.method_hash,
            SERVER_PEER_ID,
            sender_is_owner,
            &mut args,
        ) {
            warn!("RPC dropped: {error}");
        }
    }

    fn flush_replication(&mut self, transport: &mut dyn Transport) {
        let Some(server) = self.server_peer else {
            return;
        };
        for command in self.replication.take_commands() {
            match command {
                ReplicationCommand::SendSuccess { message } => {
                    send_framed(
                        transport,
                        server,
                        MessageType::OBJECT_SUCCESS,
                        &message,
                        self.reliable_channel,
                    );
                }
                ReplicationCommand::ObjectConnected { network_id, entity } => {
                    self.events
                        .push(ClientEvent::ObjectConnected { network_id, entity });
                }
                ReplicationCommand::ObjectDisconnected { network_id, entity } => {
                    self.events
                        .push(ClientEvent::ObjectDisconnected { network_id, entity });
                }
                ReplicationCommand::SendSpawn { .. } | ReplicationCommand::SendUnspawn { .. } => {
                    warn!("server-authored command queued on the client; ignoring");
                }
            }
        }
    }

    // Replication

    /// Registers a locally-created object under a developer-supplied
    /// unique id, matching it against the server's spawn for the same id
    /// in whichever order the two sides arrive.
    pub fn register_object(
        &mut self,
        world: &mut dyn HostWorld<E>,
        entity: E,
        unique_id: &str,
    ) -> Result<(), TetherClientError> {
        Ok(self.replication.client_register(world, entity, unique_id)?)
    }

    /// Tears down a registration that never connected.
    pub fn unregister_pending(&mut self, unique_id: &str) -> Result<(), TetherClientError> {
        Ok(self.replication.unregister_pending(unique_id)?)
    }

    pub fn object_record(&self, network_id: NetworkId) -> Option<&tether_shared::ObjectRecord<E>> {
        self.replication.record(network_id)
    }

    /// Asks the server to unspawn an object this client owns. The local
    /// mirror is torn down when the server's unspawn broadcast returns.
    pub fn request_unspawn(
        &mut self,
        network_id: NetworkId,
        destroy: bool,
    ) -> Result<(), TetherClientError> {
        let Some(record) = self.replication.record(network_id) else {
            return Err(TetherClientError::Replication(
                tether_shared::ReplicationError::UnknownNetworkId { network_id },
            ));
        };
        let permitted =
            self.assigned_peer_id.is_some_and(|id| id == record.owner) && record.owner_can_unspawn;
        if !permitted {
            return Err(TetherClientError::UnspawnNotPermitted { network_id });
        }

        let (Some(transport), Some(server)) = (self.transport.as_deref_mut(), self.server_peer)
        else {
            return Err(TetherClientError::NotConnected);
        };
        send_framed(
            transport,
            server,
            MessageType::DESTROY_OBJECT,
            &DestroyObjectMessage {
                network_id,
                destroy,
            },
            self.reliable_channel,
        );
        Ok(())
    }

    /// Asks the server to take ownership back. Returning ownership to the
    /// server is the only transfer a client may request.
    pub fn request_owner_return(&mut self, network_id: NetworkId) -> Result<(), TetherClientError> {
        let (Some(transport), Some(server)) = (self.transport.as_deref_mut(), self.server_peer)
        else {
            return Err(TetherClientError::NotConnected);
        };
        send_framed(
            transport,
            server,
            MessageType::CHANGE_OWNER_REQUEST,
            &ChangeOwnerMessage {
                network_id,
                new_owner: SERVER_PEER_ID,
            },
            self.reliable_channel,
        );
        Ok(())
    }

    // Custom messages

    /// Sends an application-registered message to the server. The payload
    /// bytes are handed to the remote handler as-is.
    pub fn send_message(
        &mut self,
        message_type: MessageType,
        payload: &[u8],
    ) -> Result<(), TetherClientError> {
        let channel = self.reliable_channel;
        let (Some(transport), Some(server)) = (self.transport.as_deref_mut(), self.server_peer)
        else {
            return Err(TetherClientError::NotConnected);
        };
        let mut writer = BitWriter::new();
        EnvelopeHeader::new(message_type).ser(&mut writer);
        for byte in payload {
            writer.write_byte(*byte);
        }
        let bytes = writer.to_bytes();
        transport.send(server, &bytes, channel)?;
        Ok(())
    }

    // RPC

    /// Invokes a remote-callable method. Server-target methods are sent to
    /// the server; client-target methods short-circuit in-process since
    /// this node is the receiver.
    pub fn invoke_rpc(
        &mut self,
        world: &mut dyn HostWorld<E>,
        network_id: NetworkId,
        method_hash: u64,
        args: Vec<u8>,
    ) -> Result<(), TetherClientError> {
        let Some(record) = self.replication.record(network_id) else {
            return Err(TetherClientError::Replication(
                tether_shared::ReplicationError::UnknownNetworkId { network_id },
            ));
        };
        let entity = record.entity;
        let type_hash = record.type_hash;
        let owner = record.owner;

        let Some(target) = self.rpcs.target_of(type_hash, method_hash) else {
            return Err(TetherClientError::Rpc(tether_shared::RpcError::UnknownMethod {
                type_hash,
                method_hash,
            }));
        };

        match target {
            RpcTarget::ServerOnly => {
                let (Some(transport), Some(server)) =
                    (self.transport.as_deref_mut(), self.server_peer)
                else {
                    return Err(TetherClientError::NotConnected);
                };
                send_framed(
                    transport,
                    server,
                    MessageType::SERVER_RPC,
                    &RpcMessage {
                        network_id,
                        method_hash,
                        args,
                    },
                    self.reliable_channel,
                );
            }
            RpcTarget::ClientOnly => {
                // the caller is the receiver; skip the wire entirely
                let sender = self.assigned_peer_id.unwrap_or(SERVER_PEER_ID);
                let mut reader = BitReader::new(&args);
                self.rpcs.dispatch(
                    world,
                    entity,
                    HostType::Client,
                    type_hash,
                    method_hash,
                    sender,
                    owner == sender,
                    &mut reader,
                )?;
            }
        }
        Ok(())
    }
}
