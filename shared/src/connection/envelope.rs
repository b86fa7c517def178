use tether_serde::{BitReader, BitWrite, Serde, SerdeErr, UnsignedInteger};

use crate::messages::MessageType;

/// The fixed header in front of every message payload:
/// `[1 bit encrypted][1 bit authenticated][6 bits message type]`.
///
/// The security bits are reserved and always zero; a set bit from a remote
/// peer is a framing error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EnvelopeHeader {
    pub encrypted: bool,
    pub authenticated: bool,
    pub message_type: MessageType,
}

impl EnvelopeHeader {
    pub fn new(message_type: MessageType) -> Self {
        Self {
            encrypted: false,
            authenticated: false,
            message_type,
        }
    }
}

impl Serde for EnvelopeHeader {
    fn ser(&self, writer: &mut dyn BitWrite) {
        self.encrypted.ser(writer);
        self.authenticated.ser(writer);
        UnsignedInteger::<6>::new(self.message_type.wire_value() as i128).ser(writer);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        let encrypted = bool::de(reader)?;
        let authenticated = bool::de(reader)?;
        let raw = UnsignedInteger::<6>::de(reader)?.get() as u8;
        Ok(Self {
            encrypted,
            authenticated,
            message_type: MessageType::from_wire(raw),
        })
    }

    fn bit_length(&self) -> u32 {
        8
    }
}
