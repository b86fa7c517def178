use thiserror::Error;

use tether_serde::{BitReader, BitWrite, Serde, SerdeErr, UnsignedVariableInteger};

use crate::hashing::{fnv1a, HashSize};

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Protocol is already locked")]
    AlreadyLocked,
}

/// A deterministic hash over the configuration fields that must match
/// between peers for a connection to be semantically compatible.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConfigFingerprint(u64);

impl ConfigFingerprint {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl Serde for ConfigFingerprint {
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

/// Protocol-level configuration, built once and locked before a node starts
/// running.
///
/// Only `protocol_version`, `rpc_hash_size` and `delta_var_sync` take part
/// in the compatibility fingerprint; local tuning knobs live in
/// [`ConnectionConfig`](crate::ConnectionConfig) and may differ between
/// peers.
pub struct Protocol {
    pub protocol_version: u16,
    pub rpc_hash_size: HashSize,
    /// Whether variable-sync payloads use the diff-against-previous
    /// encoding.
    pub delta_var_sync: bool,
    fingerprint: Option<ConfigFingerprint>,
    locked: bool,
}

impl Default for Protocol {
    fn default() -> Self {
        Self {
            protocol_version: 1,
            rpc_hash_size: HashSize::B64,
            delta_var_sync: true,
            fingerprint: None,
            locked: false,
        }
    }
}

impl Protocol {
    pub fn builder() -> Self {
        Self::default()
    }

    pub fn protocol_version(&mut self, version: u16) -> &mut Self {
        self.check_lock();
        self.protocol_version = version;
        self
    }

    pub fn rpc_hash_size(&mut self, size: HashSize) -> &mut Self {
        self.check_lock();
        self.rpc_hash_size = size;
        self
    }

    pub fn delta_var_sync(&mut self, enabled: bool) -> &mut Self {
        self.check_lock();
        self.delta_var_sync = enabled;
        self
    }

    pub fn lock(&mut self) {
        self.check_lock();
        self.locked = true;
        self.fingerprint = Some(self.compute_fingerprint());
    }

    pub fn try_lock(&mut self) -> Result<(), ProtocolError> {
        self.try_check_lock()?;
        self.locked = true;
        self.fingerprint = Some(self.compute_fingerprint());
        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn try_check_lock(&self) -> Result<(), ProtocolError> {
        if self.locked {
            Err(ProtocolError::AlreadyLocked)
        } else {
            Ok(())
        }
    }

    pub fn check_lock(&self) {
        if self.locked {
            panic!("Protocol already locked!");
        }
    }

    pub fn build(&mut self) -> Self {
        std::mem::take(self)
    }

    /// The compatibility fingerprint, computed once at lock time.
    pub fn fingerprint(&self) -> ConfigFingerprint {
        match self.fingerprint {
            Some(fingerprint) => fingerprint,
            None => self.compute_fingerprint(),
        }
    }

    fn compute_fingerprint(&self) -> ConfigFingerprint {
        let mut bytes = Vec::with_capacity(4);
        bytes.extend_from_slice(&self.protocol_version.to_le_bytes());
        bytes.push(self.rpc_hash_size.discriminant());
        bytes.push(self.delta_var_sync as u8);
        ConfigFingerprint(fnv1a(&bytes))
    }
}
