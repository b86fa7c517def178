//! # Tether Serde
//! Bit-level serialization used by the tether messaging core.

mod bit_reader;
mod bit_writer;
mod delta;
mod error;
mod integer;
mod serde;

pub use bit_reader::BitReader;
pub use bit_writer::{BitWrite, BitWriter};
pub use delta::{read_delta_bytes, write_delta_bytes};
pub use error::SerdeErr;
pub use integer::{
    SignedInteger, SignedVariableInteger, UnsignedInteger, UnsignedVariableInteger,
};
pub use serde::Serde;
