use tether_serde::{BitReader, BitWrite, Serde, SerdeErr, UnsignedVariableInteger};

/// Identifies a connected participant. The value is owned by the transport;
/// this crate only reserves `0`.
pub type PeerId = u64;

/// From any peer's point of view, "the server". This is a local
/// placeholder, never a transport identity.
pub const SERVER_PEER_ID: PeerId = 0;

/// Identifier for a replicated object, unique among currently-live objects
/// on the authority that allocated it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetworkId(u64);

impl NetworkId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl From<u64> for NetworkId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<NetworkId> for u64 {
    fn from(id: NetworkId) -> Self {
        id.0
    }
}

impl Serde for NetworkId {
    fn ser(&self, writer: &mut dyn BitWrite) {
        UnsignedVariableInteger::<7>::new(self.0 as i128).ser(writer);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        Ok(Self(UnsignedVariableInteger::<7>::de(reader)?.get() as u64))
    }

    fn bit_length(&self) -> u32 {
        UnsignedVariableInteger::<7>::new(self.0 as i128).bit_length()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HostType {
    Server,
    Client,
}

impl HostType {
    pub fn invert(self) -> Self {
        match self {
            HostType::Server => HostType::Client,
            HostType::Client => HostType::Server,
        }
    }
}

/// Delivery scope of a registered message handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HandlerScope {
    ServerOnly,
    ClientOnly,
    Both,
}

impl HandlerScope {
    /// Whether a node of the given type may receive this message.
    pub fn allows(&self, host_type: HostType) -> bool {
        match self {
            HandlerScope::ServerOnly => host_type == HostType::Server,
            HandlerScope::ClientOnly => host_type == HostType::Client,
            HandlerScope::Both => true,
        }
    }
}
