/// A byte-wide message namespace shared by the built-in types below and an
/// application-registered extension range. Only values `0..=62` are
/// encodable in the envelope's 6-bit field; `INVALID` (255 internally, 63
/// on the wire) is reserved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageType(pub u8);

impl MessageType {
    pub const CONNECTION_REQUEST: Self = Self(0);
    pub const CONNECTION_APPROVED: Self = Self(1);
    pub const ADD_OBJECT: Self = Self(2);
    pub const DESTROY_OBJECT: Self = Self(3);
    pub const OBJECT_SUCCESS: Self = Self(4);
    pub const TIME_SYNC: Self = Self(5);
    pub const CHANGE_OWNER: Self = Self(6);
    pub const CHANGE_OWNER_REQUEST: Self = Self(7);
    pub const SERVER_RPC: Self = Self(8);
    pub const CLIENT_RPC: Self = Self(9);

    /// First slot available to application-registered messages.
    pub const FIRST_CUSTOM: u8 = 10;

    /// Highest type value the 6-bit wire field can carry.
    pub const MAX_WIRE_VALUE: u8 = 62;

    pub const INVALID: Self = Self(255);

    const INVALID_WIRE_VALUE: u8 = 63;

    /// Whether this is one of the handshake messages a still-pending peer
    /// is allowed to send.
    pub fn is_handshake(&self) -> bool {
        *self == Self::CONNECTION_REQUEST || *self == Self::CONNECTION_APPROVED
    }

    pub fn wire_value(&self) -> u8 {
        if *self == Self::INVALID {
            Self::INVALID_WIRE_VALUE
        } else {
            debug_assert!(self.0 <= Self::MAX_WIRE_VALUE);
            self.0
        }
    }

    pub fn from_wire(raw: u8) -> Self {
        if raw == Self::INVALID_WIRE_VALUE {
            Self::INVALID
        } else {
            Self(raw)
        }
    }
}
