use std::{collections::HashMap, hash::Hash};

use log::{error, warn};

use tether_serde::BitReader;

use crate::{
    hashing::{hash_str, HashSize},
    types::{HostType, PeerId},
    world::{error::RpcError, host_world::HostWorld},
};

/// Which side of the connection a method executes on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RpcTarget {
    ServerOnly,
    ClientOnly,
}

/// Typed handler for one remote-callable method. Receives the host world,
/// the target object, the sending peer, and the serialized arguments.
pub type RpcHandler<E> =
    Box<dyn FnMut(&mut dyn HostWorld<E>, E, PeerId, &mut BitReader) -> Result<(), RpcError>>;

pub struct RpcMethodDescriptor<E: Copy + Eq + Hash> {
    pub name: String,
    pub target: RpcTarget,
    pub requires_ownership: bool,
    handler: RpcHandler<E>,
}

/// What became of an inbound invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RpcDispatch {
    Invoked,
    /// Dropped without invoking the handler; no response is sent.
    Dropped,
}

struct RpcTable<E: Copy + Eq + Hash> {
    methods: Vec<RpcMethodDescriptor<E>>,
    // name hash and, for parameterized methods, signature hash both point
    // at the same descriptor
    server_invocable: HashMap<u64, usize>,
    client_invocable: HashMap<u64, usize>,
}

impl<E: Copy + Eq + Hash> RpcTable<E> {
    fn new() -> Self {
        Self {
            methods: Vec::new(),
            server_invocable: HashMap::new(),
            client_invocable: HashMap::new(),
        }
    }

    fn map_for(&self, target: RpcTarget) -> &HashMap<u64, usize> {
        match target {
            RpcTarget::ServerOnly => &self.server_invocable,
            RpcTarget::ClientOnly => &self.client_invocable,
        }
    }

    fn map_for_mut(&mut self, target: RpcTarget) -> &mut HashMap<u64, usize> {
        match target {
            RpcTarget::ServerOnly => &mut self.server_invocable,
            RpcTarget::ClientOnly => &mut self.client_invocable,
        }
    }
}

/// Per-type registration tables mapping method-identity hashes to typed
/// handlers. Built once while the node is configured, then frozen for the
/// process lifetime.
pub struct RpcRegistry<E: Copy + Eq + Hash> {
    tables: HashMap<u64, RpcTable<E>>,
    hash_size: HashSize,
    locked: bool,
    collision_reported: bool,
}

impl<E: Copy + Eq + Hash> RpcRegistry<E> {
    pub fn new(hash_size: HashSize) -> Self {
        Self {
            tables: HashMap::new(),
            hash_size,
            locked: false,
            collision_reported: false,
        }
    }

    /// Registers a method under its qualified name and, when `signature`
    /// is given (methods with parameters), additionally under the
    /// name+parameter-type signature to disambiguate overloads. Returns
    /// the name hash callers invoke with.
    pub fn register_method(
        &mut self,
        type_hash: u64,
        name: &str,
        signature: Option<&str>,
        target: RpcTarget,
        requires_ownership: bool,
        handler: RpcHandler<E>,
    ) -> Result<u64, RpcError> {
        if self.locked {
            return Err(RpcError::RegistrationClosed);
        }

        let name_hash = hash_str(name, self.hash_size);
        let table = self.tables.entry(type_hash).or_insert_with(RpcTable::new);

        if let Some(&existing) = table.map_for(target).get(&name_hash) {
            let existing_name = table.methods[existing].name.clone();
            if existing_name != name {
                // a genuine collision is a misconfiguration, not bad input
                if !self.collision_reported {
                    self.collision_reported = true;
                    error!(
                        "RPC method hash collision between '{existing_name}' and '{name}'"
                    );
                }
                return Err(RpcError::MethodHashCollision {
                    first: existing_name,
                    second: name.to_string(),
                });
            }
        }

        let index = table.methods.len();
        table.methods.push(RpcMethodDescriptor {
            name: name.to_string(),
            target,
            requires_ownership,
            handler,
        });
        table.map_for_mut(target).insert(name_hash, index);

        if let Some(signature) = signature {
            let signature_hash = hash_str(signature, self.hash_size);
            table.map_for_mut(target).insert(signature_hash, index);
        }

        Ok(name_hash)
    }

    /// Closes registration. Called when the node starts running.
    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn target_of(&self, type_hash: u64, method_hash: u64) -> Option<RpcTarget> {
        let table = self.tables.get(&type_hash)?;
        if table.server_invocable.contains_key(&method_hash) {
            Some(RpcTarget::ServerOnly)
        } else if table.client_invocable.contains_key(&method_hash) {
            Some(RpcTarget::ClientOnly)
        } else {
            None
        }
    }

    /// Routes an inbound (or short-circuited local) invocation to its
    /// handler. `sender_is_owner` reflects the *sending* peer; ownership-
    /// gated methods drop silently apart from a log line when it is false.
    #[allow(clippy::too_many_arguments)]
    pub fn dispatch(
        &mut self,
        world: &mut dyn HostWorld<E>,
        entity: E,
        local_host: HostType,
        type_hash: u64,
        method_hash: u64,
        sender: PeerId,
        sender_is_owner: bool,
        args: &mut BitReader,
    ) -> Result<RpcDispatch, RpcError> {
        let Some(table) = self.tables.get_mut(&type_hash) else {
            return Err(RpcError::UnknownType { type_hash });
        };

        let target = match local_host {
            HostType::Server => RpcTarget::ServerOnly,
            HostType::Client => RpcTarget::ClientOnly,
        };
        let Some(&index) = table.map_for(target).get(&method_hash) else {
            return Err(RpcError::UnknownMethod {
                type_hash,
                method_hash,
            });
        };

        let descriptor = &mut table.methods[index];
        if descriptor.requires_ownership && !sender_is_owner {
            warn!(
                "dropping RPC '{}' from non-owner peer {sender}",
                descriptor.name
            );
            return Ok(RpcDispatch::Dropped);
        }

        (descriptor.handler)(world, entity, sender, args)?;
        Ok(RpcDispatch::Invoked)
    }
}
