use crate::{
    bit_reader::BitReader, bit_writer::BitWrite, error::SerdeErr,
    integer::UnsignedVariableInteger, serde::Serde,
};

/// Writes `new` as a diff against `old`: a length prefix, a bitmap of
/// changed elements, then the changed values only. Elements past the end of
/// `old` are always treated as changed.
pub fn write_delta_bytes(writer: &mut dyn BitWrite, old: &[u8], new: &[u8]) {
    UnsignedVariableInteger::<7>::new(new.len() as i128).ser(writer);

    for (index, byte) in new.iter().enumerate() {
        let changed = old.get(index) != Some(byte);
        writer.write_bit(changed);
    }
    for (index, byte) in new.iter().enumerate() {
        if old.get(index) != Some(byte) {
            writer.write_byte(*byte);
        }
    }
}

/// Reconstructs a payload written by [`write_delta_bytes`], pulling
/// unchanged elements from `old`.
pub fn read_delta_bytes(reader: &mut BitReader, old: &[u8]) -> Result<Vec<u8>, SerdeErr> {
    let length = UnsignedVariableInteger::<7>::de(reader)?.get();
    if length < 0 || length > reader.bytes_remaining().saturating_mul(8) as i128 {
        return Err(SerdeErr);
    }
    let length = length as usize;

    let mut changed = Vec::with_capacity(length);
    for _ in 0..length {
        changed.push(reader.read_bit()?);
    }

    let mut output = Vec::with_capacity(length);
    for (index, is_changed) in changed.iter().enumerate() {
        if *is_changed {
            output.push(reader.read_byte()?);
        } else {
            // unchanged element must exist in the previous version
            let Some(byte) = old.get(index) else {
                return Err(SerdeErr);
            };
            output.push(*byte);
        }
    }
    Ok(output)
}
