use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use byteorder::{LittleEndian, ReadBytesExt};
use super::types::*;

/// The magic number that identifies GGUF files
pub const GGUF_MAGIC: u32 = 0x46554747; // "GGUF" in ASCII

/// Reads a length or count field. Version 1 used 32-bit counts, later versions 64-bit.
pub fn read_len<R: Read>(reader: &mut R, version: u32) -> Result<u64, GGUFError> {
    if version >= 2 {
        Ok(reader.read_u64::<LittleEndian>()?)
    } else {
        Ok(reader.read_u32::<LittleEndian>()? as u64)
    }
}

/// Read a string value from the reader
pub fn read_string<R: Read>(reader: &mut R, version: u32) -> Result<String, GGUFError> {
    let str_len = read_len(reader, version)?;
    let mut buffer = Vec::new();
    reader.by_ref().take(str_len).read_to_end(&mut buffer)?;
    if buffer.len() as u64 != str_len {
        return Err(GGUFError::InvalidFormat("string runs past end of file".into()));
    }

    String::from_utf8(buffer)
        .map_err(|e| GGUFError::InvalidFormat(format!("Invalid UTF-8 in string: {}", e)))
}

/// Discards `count` bytes without allocating for them
fn discard<R: Read>(reader: &mut R, count: u64) -> Result<(), GGUFError> {
    let skipped = io::copy(&mut reader.by_ref().take(count), &mut io::sink())?;
    if skipped != count {
        return Err(GGUFError::InvalidFormat("value runs past end of file".into()));
    }
    Ok(())
}

/// Size in bytes of a fixed-width GGUF value type
fn fixed_size(value_type: u32) -> Option<u64> {
    match value_type {
        GGUF_TYPE_UINT8 | GGUF_TYPE_INT8 | GGUF_TYPE_BOOL => Some(1),
        GGUF_TYPE_UINT16 | GGUF_TYPE_INT16 => Some(2),
        GGUF_TYPE_UINT32 | GGUF_TYPE_INT32 | GGUF_TYPE_FLOAT32 => Some(4),
        GGUF_TYPE_UINT64 | GGUF_TYPE_INT64 | GGUF_TYPE_FLOAT64 => Some(8),
        _ => None,
    }
}

/// Read a scalar GGUF value of the specified type
pub fn read_value_by_type<R: Read>(reader: &mut R, value_type: u32, version: u32) -> Result<GGUFValue, GGUFError> {
    let value = match value_type {
        GGUF_TYPE_UINT8 => GGUFValue::Int(reader.read_u8()? as i64),
        GGUF_TYPE_INT8 => GGUFValue::Int(reader.read_i8()? as i64),
        GGUF_TYPE_UINT16 => GGUFValue::Int(reader.read_u16::<LittleEndian>()? as i64),
        GGUF_TYPE_INT16 => GGUFValue::Int(reader.read_i16::<LittleEndian>()? as i64),
        GGUF_TYPE_UINT32 => GGUFValue::Int(reader.read_u32::<LittleEndian>()? as i64),
        GGUF_TYPE_INT32 => GGUFValue::Int(reader.read_i32::<LittleEndian>()? as i64),
        GGUF_TYPE_FLOAT32 => GGUFValue::Float(reader.read_f32::<LittleEndian>()?),
        GGUF_TYPE_BOOL => GGUFValue::Bool(reader.read_u8()? != 0),
        GGUF_TYPE_STRING => GGUFValue::String(read_string(reader, version)?),
        GGUF_TYPE_UINT64 => GGUFValue::Int(reader.read_u64::<LittleEndian>()? as i64),
        GGUF_TYPE_INT64 => GGUFValue::Int(reader.read_i64::<LittleEndian>()?),
        // Store as f32 since we don't have a dedicated f64 type
        GGUF_TYPE_FLOAT64 => GGUFValue::Float(reader.read_f64::<LittleEndian>()? as f32),
        _ => {
            return Err(GGUFError::InvalidFormat(format!("Unknown value type: {}", value_type)));
        }
    };
    Ok(value)
}

/// Skips an array value (element type, length, elements), including nested arrays
pub fn skip_array<R: Read>(reader: &mut R, version: u32) -> Result<(), GGUFError> {
    let element_type = reader.read_u32::<LittleEndian>()?;
    let len = read_len(reader, version)?;

    if let Some(size) = fixed_size(element_type) {
        let total = size
            .checked_mul(len)
            .ok_or_else(|| GGUFError::InvalidFormat("array length overflows".into()))?;
        return discard(reader, total);
    }

    for _ in 0..len {
        match element_type {
            GGUF_TYPE_STRING => {
                let str_len = read_len(reader, version)?;
                discard(reader, str_len)?;
            }
            GGUF_TYPE_ARRAY => skip_array(reader, version)?,
            other => {
                return Err(GGUFError::InvalidFormat(format!("Unknown array element type: {}", other)));
            }
        }
    }
    Ok(())
}

/// Checks if a file at the given path is a GGUF format file by verifying its magic number.
///
/// Returns `true` if the file exists and has a valid GGUF magic number, `false` otherwise
pub fn is_gguf_file<P: AsRef<Path>>(path: P) -> bool {
    if let Ok(mut file) = File::open(path) {
        if let Ok(magic) = file.read_u32::<LittleEndian>() {
            return magic == GGUF_MAGIC;
        }
    }
    false
}
