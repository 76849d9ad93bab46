pub mod backend;
pub mod scripted;
#[cfg(feature = "llama")]
pub mod llama;

// Re-export the capability traits and their vocabulary
pub use backend::{BackendError, BackendLoader, Evaluator, LoadParams, ModelBackend, SamplingConfig, Token};
// Re-export the deterministic backend used by tests and the echo mode
pub use scripted::{ScriptedBackend, ScriptedLoader, ScriptedProbe};
#[cfg(feature = "llama")]
pub use llama::{LlamaBackend, LlamaLoader};
