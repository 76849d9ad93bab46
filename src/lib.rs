//! Inference-session layer for a local chat backend.
//!
//! Loads GGUF weights into a bounded context, runs multi-turn generation
//! over it with streamed output, and returns sanitized answers through
//! [`llm::ChatService`].

pub mod config;
pub mod error;
pub mod gguf;
pub mod llm;

pub use error::{ChatError, ErrorKind, ModelLoadError};
