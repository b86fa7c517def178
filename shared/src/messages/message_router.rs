use log::warn;

use tether_serde::BitReader;

use crate::{
    connection::EnvelopeHeader,
    messages::{error::RouterError, message_type::MessageType},
    types::{HandlerScope, HostType, PeerId},
};

/// Handler for an application-registered message type. Receives the sending
/// peer and the payload positioned just past the envelope header.
pub type CustomHandler = Box<dyn FnMut(PeerId, &mut BitReader) -> Result<(), RouterError>>;

enum RouteKind {
    Builtin,
    Custom(CustomHandler),
}

struct RouteEntry {
    name: String,
    scope: HandlerScope,
    kind: RouteKind,
}

/// What the router decided about an incoming envelope.
#[derive(Debug, PartialEq, Eq)]
pub enum RouteDecision {
    /// A built-in message; the node dispatches it itself.
    Builtin(MessageType),
    /// A custom handler consumed the payload.
    Handled,
}

const TABLE_SLOTS: usize = 256;

/// Fixed-size dispatch table mapping a message-type byte to its handler
/// metadata. Registration is only legal before the node starts running.
pub struct MessageRouter {
    entries: Vec<Option<RouteEntry>>,
    host_type: HostType,
    locked: bool,
}

impl MessageRouter {
    pub fn new(host_type: HostType) -> Self {
        let mut entries = Vec::with_capacity(TABLE_SLOTS);
        entries.resize_with(TABLE_SLOTS, || None);

        let mut router = Self {
            entries,
            host_type,
            locked: false,
        };
        router.register_builtins();
        router
    }

    fn register_builtins(&mut self) {
        let builtins: [(MessageType, &str, HandlerScope); 10] = [
            (MessageType::CONNECTION_REQUEST, "connection_request", HandlerScope::ServerOnly),
            (MessageType::CONNECTION_APPROVED, "connection_approved", HandlerScope::ClientOnly),
            (MessageType::ADD_OBJECT, "add_object", HandlerScope::ClientOnly),
            // clients with unspawn permission may also send this upstream
            (MessageType::DESTROY_OBJECT, "destroy_object", HandlerScope::Both),
            (MessageType::OBJECT_SUCCESS, "object_success", HandlerScope::ServerOnly),
            (MessageType::TIME_SYNC, "time_sync", HandlerScope::ClientOnly),
            (MessageType::CHANGE_OWNER, "change_owner", HandlerScope::ClientOnly),
            (MessageType::CHANGE_OWNER_REQUEST, "change_owner_request", HandlerScope::ServerOnly),
            (MessageType::SERVER_RPC, "server_rpc", HandlerScope::ServerOnly),
            (MessageType::CLIENT_RPC, "client_rpc", HandlerScope::ClientOnly),
        ];
        for (message_type, name, scope) in builtins {
            self.entries[message_type.0 as usize] = Some(RouteEntry {
                name: name.to_string(),
                scope,
                kind: RouteKind::Builtin,
            });
        }
    }

    /// Registers an application message in the extension range, returning
    /// the assigned type. Fails once the router is locked.
    pub fn register_custom(
        &mut self,
        name: &str,
        scope: HandlerScope,
        handler: CustomHandler,
    ) -> Result<MessageType, RouterError> {
        if self.locked {
            return Err(RouterError::RegistrationClosed);
        }

        let mut slot = MessageType::FIRST_CUSTOM;
        loop {
            if slot > MessageType::MAX_WIRE_VALUE {
                return Err(RouterError::UnencodableType { value: slot });
            }
            if self.entries[slot as usize].is_none() {
                break;
            }
            slot += 1;
        }

        self.entries[slot as usize] = Some(RouteEntry {
            name: name.to_string(),
            scope,
            kind: RouteKind::Custom(handler),
        });
        Ok(MessageType(slot))
    }

    /// Closes registration. Called when the node starts running.
    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn name_of(&self, message_type: MessageType) -> Option<&str> {
        self.entries
            .get(message_type.0 as usize)
            .and_then(|entry| entry.as_ref())
            .map(|entry| entry.name.as_str())
    }

    /// Demultiplexes one incoming envelope.
    ///
    /// `sender_pending` marks a peer that has not completed the handshake;
    /// such a peer may only deliver handshake traffic, and a violation is
    /// returned so the caller can drop it.
    pub fn route(
        &mut self,
        sender: PeerId,
        sender_pending: bool,
        header: &EnvelopeHeader,
        reader: &mut BitReader,
    ) -> Result<RouteDecision, RouterError> {
        let message_type = header.message_type;

        if message_type == MessageType::INVALID {
            return Err(RouterError::InvalidMessageType);
        }

        let Some(entry) = self
            .entries
            .get_mut(message_type.0 as usize)
            .and_then(|entry| entry.as_mut())
        else {
            return Err(RouterError::UnknownMessageType {
                value: message_type.0,
            });
        };

        if sender_pending && !message_type.is_handshake() {
            return Err(RouterError::PendingPeerViolation {
                peer: sender,
                name: entry.name.clone(),
            });
        }

        if !entry.scope.allows(self.host_type) {
            warn!(
                "dropping out-of-scope message '{}' from peer {}",
                entry.name, sender
            );
            return Err(RouterError::ScopeViolation {
                name: entry.name.clone(),
            });
        }

        match &mut entry.kind {
            RouteKind::Builtin => Ok(RouteDecision::Builtin(message_type)),
            RouteKind::Custom(handler) => {
                handler(sender, reader)?;
                Ok(RouteDecision::Handled)
            }
        }
    }
}
