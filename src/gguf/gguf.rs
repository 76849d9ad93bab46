use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use byteorder::{LittleEndian, ReadBytesExt};
use tracing::debug;

use super::gguf_utils::{self, GGUF_MAGIC};
use super::types::{GGUFError, GGUFValue, GGUF_TYPE_ARRAY};

/// Highest header version the probe understands
const MAX_SUPPORTED_VERSION: u32 = 3;

/// Header-level view of a GGUF weight file.
///
/// Reads the magic number, version, tensor count and every scalar metadata
/// entry. Tensor descriptors and data are never touched, so probing a
/// multi-gigabyte file stays cheap.
#[derive(Debug, Clone)]
pub struct GGUFReader {
    /// Path to the GGUF file (empty when read from memory)
    pub path: PathBuf,
    /// Header version
    pub version: u32,
    /// Number of tensors in the file
    pub tensor_count: u64,
    /// Scalar metadata key-value pairs
    pub metadata: BTreeMap<String, GGUFValue>,
}

impl GGUFReader {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, GGUFError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut reader = Self::from_reader(&mut BufReader::new(file))?;
        reader.path = path.to_path_buf();
        debug!(path = %path.display(), version = reader.version, entries = reader.metadata.len(), "Probed GGUF header");
        Ok(reader)
    }

    pub fn from_reader<R: Read>(reader: &mut R) -> Result<Self, GGUFError> {
        let magic = reader.read_u32::<LittleEndian>()
            .map_err(|_| GGUFError::InvalidFormat("file too short for a GGUF header".into()))?;
        if magic != GGUF_MAGIC {
            return Err(GGUFError::InvalidFormat("Invalid magic number".into()));
        }

        let version = reader.read_u32::<LittleEndian>()?;
        if version == 0 || version > MAX_SUPPORTED_VERSION {
            return Err(GGUFError::UnsupportedVersion(version));
        }

        let tensor_count = gguf_utils::read_len(reader, version)?;
        let metadata_count = gguf_utils::read_len(reader, version)?;

        let mut metadata = BTreeMap::new();
        for _ in 0..metadata_count {
            let key = gguf_utils::read_string(reader, version)?;
            let value_type = reader.read_u32::<LittleEndian>()?;
            if value_type == GGUF_TYPE_ARRAY {
                gguf_utils::skip_array(reader, version)?;
                continue;
            }
            let value = gguf_utils::read_value_by_type(reader, value_type, version)?;
            metadata.insert(key, value);
        }

        Ok(Self {
            path: PathBuf::new(),
            version,
            tensor_count,
            metadata,
        })
    }

    pub fn get_metadata_value(&self, key: &str) -> Option<&GGUFValue> {
        self.metadata.get(key)
    }

    /// `general.architecture`, e.g. "llama"
    pub fn architecture(&self) -> Option<&str> {
        self.get_metadata_value("general.architecture").and_then(GGUFValue::as_str)
    }

    /// Looks up `<arch>.<key>` as an unsigned integer
    pub fn arch_int(&self, key: &str) -> Option<u64> {
        let arch = self.architecture()?;
        self.get_metadata_value(&format!("{}.{}", arch, key))
            .and_then(GGUFValue::as_int)
            .and_then(|v| u64::try_from(v).ok())
    }

    /// Trained context length of the weights
    pub fn context_length(&self) -> Option<u64> {
        self.arch_int("context_length")
    }

    /// Number of transformer blocks
    pub fn block_count(&self) -> Option<u64> {
        self.arch_int("block_count")
    }
}
