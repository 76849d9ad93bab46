use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// A token id as understood by the backend's vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(pub i32);

/// Failures reported by a model backend
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BackendError {
    #[error("failed to load weights: {0}")]
    Load(String),

    #[error("failed to create context: {0}")]
    Context(String),

    #[error("tokenization failed: {0}")]
    Tokenize(String),

    #[error("evaluation failed: {0}")]
    Evaluate(String),
}

/// How the next token is chosen from the model's output distribution
#[derive(Debug, Clone, PartialEq)]
pub enum SamplingConfig {
    /// Always take the most likely token
    Greedy,
    /// Repetition penalty, temperature, top-k and top-p applied in that order
    Standard {
        temperature: f32,
        top_k: i32,
        top_p: f32,
        repeat_penalty: f32,
        repeat_last_n: usize,
    },
}

impl Default for SamplingConfig {
    fn default() -> Self {
        SamplingConfig::Standard {
            temperature: 0.8,
            top_k: 40,
            top_p: 0.95,
            repeat_penalty: 1.1,
            repeat_last_n: 64,
        }
    }
}

/// Parameters handed to a backend when it loads weights
#[derive(Debug, Clone, PartialEq)]
pub struct LoadParams {
    /// Context capacity in tokens
    pub context_size: usize,
    /// Layers offloaded to the accelerator (0 = CPU only)
    pub gpu_layers: u32,
    pub use_mmap: bool,
    pub use_mlock: bool,
}

/// Loaded weights plus the tokenizer that ships with them.
///
/// Implementations are shared read-only between every context created from
/// them, hence `Send + Sync`.
pub trait ModelBackend: Send + Sync {
    /// Converts text to tokens
    fn tokenize(&self, text: &str) -> Result<Vec<Token>, BackendError>;

    /// Raw bytes of a single token.
    ///
    /// Byte-fallback tokens carry part of a UTF-8 sequence, so pieces only
    /// make text once decoded in order.
    fn token_bytes(&self, token: Token) -> Vec<u8>;

    /// End-of-sequence token
    fn eos(&self) -> Token;

    /// Allocates evaluation state able to hold `capacity` tokens
    fn create_evaluator(&self, capacity: usize) -> Result<Box<dyn Evaluator>, BackendError>;
}

/// Per-conversation evaluation state (the KV cache in llama.cpp terms).
pub trait Evaluator: Send {
    /// Appends tokens to the evaluated sequence
    fn ingest(&mut self, tokens: &[Token]) -> Result<(), BackendError>;

    /// Samples the next token and appends it to the sequence
    fn next_token(&mut self, sampling: &SamplingConfig) -> Result<Token, BackendError>;

    /// Keeps only the first `len` tokens of the sequence
    fn truncate(&mut self, len: usize) -> Result<(), BackendError>;

    /// Forgets the whole sequence without releasing the allocation
    fn clear(&mut self) -> Result<(), BackendError> {
        self.truncate(0)
    }
}

/// Turns a weight file into a [`ModelBackend`].
pub trait BackendLoader: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    fn load(&self, path: &Path, params: &LoadParams) -> Result<Arc<dyn ModelBackend>, BackendError>;
}
