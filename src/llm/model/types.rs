use std::path::PathBuf;
use serde::{Deserialize, Serialize};

use crate::llm::backend::LoadParams;

/// What to load and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    /// Path to the GGUF weight file
    pub path: PathBuf,
    /// Context capacity in tokens
    pub context_size: usize,
    /// Layers offloaded to the accelerator (0 = none)
    pub gpu_layers: u32,
    pub use_mmap: bool,
    pub use_mlock: bool,
}

impl ModelParams {
    pub fn new(path: impl Into<PathBuf>, context_size: usize, gpu_layers: u32) -> Self {
        Self {
            path: path.into(),
            context_size,
            gpu_layers,
            use_mmap: true,
            use_mlock: false,
        }
    }

    pub(crate) fn load_params(&self) -> LoadParams {
        LoadParams {
            context_size: self.context_size,
            gpu_layers: self.gpu_layers,
            use_mmap: self.use_mmap,
            use_mlock: self.use_mlock,
        }
    }
}

/// Facts about the weights read from the GGUF header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    /// `general.name`, or the file stem when absent
    pub name: String,
    pub architecture: Option<String>,
    /// Trained context length
    pub context_length: Option<u64>,
    /// Number of transformer blocks
    pub block_count: Option<u64>,
    /// GGUF header version
    pub version: u32,
    pub tensor_count: u64,
}
