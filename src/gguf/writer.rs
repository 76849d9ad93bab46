use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use byteorder::{LittleEndian, WriteBytesExt};

use super::gguf_utils::GGUF_MAGIC;
use super::types::{GGUFError, GGUFValue};

/// Writes a version 3 GGUF header with the given scalar metadata and no tensors.
///
/// Useful for fixtures and for checking what the loader will accept without
/// shipping real weights.
pub fn write_metadata<W: Write>(writer: &mut W, entries: &[(&str, GGUFValue)]) -> Result<(), GGUFError> {
    writer.write_u32::<LittleEndian>(GGUF_MAGIC)?;
    writer.write_u32::<LittleEndian>(3)?;
    writer.write_u64::<LittleEndian>(0)?;
    writer.write_u64::<LittleEndian>(entries.len() as u64)?;

    for (key, value) in entries {
        write_string(writer, key)?;
        writer.write_u32::<LittleEndian>(value.type_code())?;
        match value {
            GGUFValue::String(s) => write_string(writer, s)?,
            GGUFValue::Int(i) => writer.write_i64::<LittleEndian>(*i)?,
            GGUFValue::Float(f) => writer.write_f32::<LittleEndian>(*f)?,
            GGUFValue::Bool(b) => writer.write_u8(u8::from(*b))?,
        }
    }
    Ok(())
}

/// Same as [`write_metadata`], into a new file at `path`
pub fn write_metadata_file<P: AsRef<Path>>(path: P, entries: &[(&str, GGUFValue)]) -> Result<(), GGUFError> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_metadata(&mut writer, entries)?;
    writer.flush()?;
    Ok(())
}

fn write_string<W: Write>(writer: &mut W, value: &str) -> Result<(), GGUFError> {
    writer.write_u64::<LittleEndian>(value.len() as u64)?;
    writer.write_all(value.as_bytes())?;
    Ok(())
}
