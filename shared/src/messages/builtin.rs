//! Payload structs for the built-in message types, bit-exact to the wire
//! formats in the protocol contract.

use tether_serde::{BitReader, BitWrite, Serde, SerdeErr, UnsignedVariableInteger};

use crate::{
    protocol::ConfigFingerprint,
    types::{NetworkId, PeerId},
};

fn pack_u64(value: u64, writer: &mut dyn BitWrite) {
    UnsignedVariableInteger::<7>::new(value as i128).ser(writer);
}

fn unpack_u64(reader: &mut BitReader) -> Result<u64, SerdeErr> {
    Ok(UnsignedVariableInteger::<7>::de(reader)?.get() as u64)
}

fn packed_len(value: u64) -> u32 {
    UnsignedVariableInteger::<7>::new(value as i128).bit_length()
}

/// `[packed u64 configFingerprint]`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionRequestMessage {
    pub fingerprint: ConfigFingerprint,
}

impl Serde for ConnectionRequestMessage {
    fn ser(&self, writer: &mut dyn BitWrite) {
        self.fingerprint.ser(writer);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        Ok(Self {
            fingerprint: ConfigFingerprint::de(reader)?,
        })
    }

    fn bit_length(&self) -> u32 {
        self.fingerprint.bit_length()
    }
}

/// `[packed u64 assignedPeerID][f32 serverTime][packed u32 reserved]`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConnectionApprovedMessage {
    pub assigned_peer_id: PeerId,
    pub server_time: f32,
    pub reserved: u32,
}

impl Serde for ConnectionApprovedMessage {
    fn ser(&self, writer: &mut dyn BitWrite) {
        pack_u64(self.assigned_peer_id, writer);
        self.server_time.ser(writer);
        pack_u64(self.reserved as u64, writer);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        Ok(Self {
            assigned_peer_id: unpack_u64(reader)?,
            server_time: f32::de(reader)?,
            reserved: unpack_u64(reader)? as u32,
        })
    }

    fn bit_length(&self) -> u32 {
        packed_len(self.assigned_peer_id) + 32 + packed_len(self.reserved as u64)
    }
}

/// `[packed u64 networkID][packed u64 ownerID][packed u64 typeHash]
/// [bit hasUniqueHash][packed u64 uniqueHash?][bit ownerCanUnspawn]
/// [bit destroyOnUnspawn]`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddObjectMessage {
    pub network_id: NetworkId,
    pub owner: PeerId,
    pub type_hash: u64,
    pub unique_hash: Option<u64>,
    pub owner_can_unspawn: bool,
    pub destroy_on_unspawn: bool,
}

impl Serde for AddObjectMessage {
    fn ser(&self, writer: &mut dyn BitWrite) {
        self.network_id.ser(writer);
        pack_u64(self.owner, writer);
        pack_u64(self.type_hash, writer);
        match self.unique_hash {
            Some(hash) => {
                writer.write_bit(true);
                pack_u64(hash, writer);
            }
            None => writer.write_bit(false),
        }
        self.owner_can_unspawn.ser(writer);
        self.destroy_on_unspawn.ser(writer);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        let network_id = NetworkId::de(reader)?;
        let owner = unpack_u64(reader)?;
        let type_hash = unpack_u64(reader)?;
        let unique_hash = if bool::de(reader)? {
            Some(unpack_u64(reader)?)
        } else {
            None
        };
        Ok(Self {
            network_id,
            owner,
            type_hash,
            unique_hash,
            owner_can_unspawn: bool::de(reader)?,
            destroy_on_unspawn: bool::de(reader)?,
        })
    }

    fn bit_length(&self) -> u32 {
        let hash_bits = match self.unique_hash {
            Some(hash) => 1 + packed_len(hash),
            None => 1,
        };
        self.network_id.bit_length()
            + packed_len(self.owner)
            + packed_len(self.type_hash)
            + hash_bits
            + 2
    }
}

/// `[packed u64 networkID][bit destroy]`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DestroyObjectMessage {
    pub network_id: NetworkId,
    pub destroy: bool,
}

impl Serde for DestroyObjectMessage {
    fn ser(&self, writer: &mut dyn BitWrite) {
        self.network_id.ser(writer);
        self.destroy.ser(writer);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        Ok(Self {
            network_id: NetworkId::de(reader)?,
            destroy: bool::de(reader)?,
        })
    }

    fn bit_length(&self) -> u32 {
        self.network_id.bit_length() + 1
    }
}

/// `[packed u64 networkID]`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjectSuccessMessage {
    pub network_id: NetworkId,
}

impl Serde for ObjectSuccessMessage {
    fn ser(&self, writer: &mut dyn BitWrite) {
        self.network_id.ser(writer);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        Ok(Self {
            network_id: NetworkId::de(reader)?,
        })
    }

    fn bit_length(&self) -> u32 {
        self.network_id.bit_length()
    }
}

/// `[f32 serverTime]`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeSyncMessage {
    pub server_time: f32,
}

impl Serde for TimeSyncMessage {
    fn ser(&self, writer: &mut dyn BitWrite) {
        self.server_time.ser(writer);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        Ok(Self {
            server_time: f32::de(reader)?,
        })
    }

    fn bit_length(&self) -> u32 {
        32
    }
}

/// `[packed u64 networkID][packed u64 newOwnerID]`
///
/// Also carried by CHANGE_OWNER_REQUEST, where `new_owner` may only name
/// the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChangeOwnerMessage {
    pub network_id: NetworkId,
    pub new_owner: PeerId,
}

impl Serde for ChangeOwnerMessage {
    fn ser(&self, writer: &mut dyn BitWrite) {
        self.network_id.ser(writer);
        pack_u64(self.new_owner, writer);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        Ok(Self {
            network_id: NetworkId::de(reader)?,
            new_owner: unpack_u64(reader)?,
        })
    }

    fn bit_length(&self) -> u32 {
        self.network_id.bit_length() + packed_len(self.new_owner)
    }
}

/// `[packed u64 networkID][packed u64 methodHash][length-prefixed args]`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RpcMessage {
    pub network_id: NetworkId,
    pub method_hash: u64,
    pub args: Vec<u8>,
}

impl Serde for RpcMessage {
    fn ser(&self, writer: &mut dyn BitWrite) {
        self.network_id.ser(writer);
        pack_u64(self.method_hash, writer);
        self.args.ser(writer);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        Ok(Self {
            network_id: NetworkId::de(reader)?,
            method_hash: unpack_u64(reader)?,
            args: Vec::<u8>::de(reader)?,
        })
    }

    fn bit_length(&self) -> u32 {
        self.network_id.bit_length() + packed_len(self.method_hash) + self.args.bit_length()
    }
}
