use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::{ChatError, ModelLoadError};
use crate::gguf::{is_gguf_file, GGUFReader};
use crate::llm::backend::{BackendError, BackendLoader, ModelBackend, Token};
use crate::llm::session::InferenceContext;
use super::types::{ModelParams, ModelSummary};

/// Loaded weights, shared read-only by every context created from them.
///
/// A handle never changes after [`ModelHandle::load`] succeeds. Wrap it in an
/// `Arc` and hand clones to whoever needs a context; the backend (and any
/// accelerator memory it reserved) is released when the last clone drops.
pub struct ModelHandle {
    path: PathBuf,
    context_size: usize,
    gpu_layers: u32,
    summary: ModelSummary,
    loaded_at: DateTime<Utc>,
    backend: Arc<dyn ModelBackend>,
}

impl ModelHandle {
    /// Validates the weight file against `params`, then asks `loader` for a backend.
    ///
    /// Checks run in this order so nothing is allocated for a file that
    /// cannot be used:
    ///
    /// 1. the file exists,
    /// 2. it carries a readable GGUF header,
    /// 3. the capacity is non-zero and within the trained context length,
    /// 4. accelerator layers do not exceed the block count plus the output layer.
    pub fn load<L>(params: &ModelParams, loader: &L) -> Result<Self, ModelLoadError>
    where
        L: BackendLoader + ?Sized,
    {
        let path = params.path.as_path();
        info!(path = %path.display(), loader = loader.name(), "Loading model");

        if !path.is_file() {
            return Err(ModelLoadError::NotFound(path.to_path_buf()));
        }

        let summary = probe(path)?;
        validate(params, &summary)?;

        let backend = loader.load(path, &params.load_params())?;

        info!(
            name = %summary.name,
            architecture = summary.architecture.as_deref().unwrap_or("unknown"),
            context_size = params.context_size,
            gpu_layers = params.gpu_layers,
            "Model loaded"
        );

        Ok(Self {
            path: path.to_path_buf(),
            context_size: params.context_size,
            gpu_layers: params.gpu_layers,
            summary,
            loaded_at: Utc::now(),
            backend,
        })
    }

    /// Allocates a fresh context sized to this handle's capacity.
    pub fn create_context(self: &Arc<Self>) -> Result<InferenceContext, ChatError> {
        InferenceContext::new(Arc::clone(self))
    }

    pub fn tokenize(&self, text: &str) -> Result<Vec<Token>, BackendError> {
        self.backend.tokenize(text)
    }

    pub fn token_bytes(&self, token: Token) -> Vec<u8> {
        self.backend.token_bytes(token)
    }

    pub fn eos(&self) -> Token {
        self.backend.eos()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Context capacity in tokens
    pub fn context_size(&self) -> usize {
        self.context_size
    }

    pub fn gpu_layers(&self) -> u32 {
        self.gpu_layers
    }

    pub fn summary(&self) -> &ModelSummary {
        &self.summary
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub(crate) fn backend(&self) -> &dyn ModelBackend {
        self.backend.as_ref()
    }

    /// Handle around an already loaded backend, skipping the file checks
    #[cfg(test)]
    pub(crate) fn with_backend(backend: Arc<dyn ModelBackend>, context_size: usize) -> Self {
        Self {
            path: PathBuf::from("in-memory.gguf"),
            context_size,
            gpu_layers: 0,
            summary: ModelSummary {
                name: "in-memory".into(),
                architecture: None,
                context_length: None,
                block_count: None,
                version: 3,
                tensor_count: 0,
            },
            loaded_at: Utc::now(),
            backend,
        }
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("path", &self.path)
            .field("context_size", &self.context_size)
            .field("gpu_layers", &self.gpu_layers)
            .field("summary", &self.summary)
            .finish_non_exhaustive()
    }
}

impl Drop for ModelHandle {
    fn drop(&mut self) {
        info!(name = %self.summary.name, "Releasing model");
    }
}

fn probe(path: &Path) -> Result<ModelSummary, ModelLoadError> {
    let unsupported = |reason: String| ModelLoadError::UnsupportedFormat {
        path: path.to_path_buf(),
        reason,
    };

    if !is_gguf_file(path) {
        return Err(unsupported("missing GGUF magic number".into()));
    }
    let reader = GGUFReader::new(path).map_err(|e| unsupported(e.to_string()))?;
    debug!(version = reader.version, tensors = reader.tensor_count, "GGUF header accepted");

    let name = reader
        .get_metadata_value("general.name")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_default();

    Ok(ModelSummary {
        name,
        architecture: reader.architecture().map(str::to_owned),
        context_length: reader.context_length(),
        block_count: reader.block_count(),
        version: reader.version,
        tensor_count: reader.tensor_count,
    })
}

fn validate(params: &ModelParams, summary: &ModelSummary) -> Result<(), ModelLoadError> {
    if params.context_size == 0 {
        return Err(ModelLoadError::InvalidParams("context size must be greater than 0".into()));
    }
    if let Some(trained) = summary.context_length {
        if params.context_size as u64 > trained {
            return Err(ModelLoadError::InvalidParams(format!(
                "context size {} exceeds the trained context length {}",
                params.context_size, trained
            )));
        }
    }
    if let Some(blocks) = summary.block_count {
        // llama.cpp offloads the output layer as one extra layer
        if u64::from(params.gpu_layers) > blocks + 1 {
            return Err(ModelLoadError::InvalidParams(format!(
                "{} accelerator layers requested but the model only has {} blocks",
                params.gpu_layers, blocks
            )));
        }
    }
    Ok(())
}
