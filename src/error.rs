//! Error types for the inference-session layer.

use std::path::PathBuf;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::backend::BackendError;

/// Reasons a weight file could not become a [`crate::llm::model::ModelHandle`].
#[derive(Debug, Error)]
pub enum ModelLoadError {
    /// Weight file does not exist.
    #[error("model file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// File exists but is not a GGUF file this build can read.
    #[error("unsupported weight format in {}: {reason}", path.display())]
    UnsupportedFormat { path: PathBuf, reason: String },

    /// Capacity or accelerator layers do not match the weights.
    #[error("invalid model parameters: {0}")]
    InvalidParams(String),

    /// The backend refused the weights.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Everything that can go wrong while serving a prompt.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("model failed to load: {0}")]
    ModelLoad(#[from] ModelLoadError),

    #[error("prompt needs {required} tokens but only {budget} fit in the context")]
    PromptTooLarge { required: usize, budget: usize },

    #[error("session is busy generating a response")]
    SessionBusy,

    #[error("session is closed")]
    SessionClosed,

    #[error("prompt is empty")]
    EmptyPrompt,

    /// Tokens were fed past the context capacity. Truncation should make
    /// this unreachable; seeing it means an invariant was broken.
    #[error("context overflow: {requested} tokens requested, {remaining} remaining")]
    ContextOverflow { requested: usize, remaining: usize },

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Wire-level error classification returned to collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ModelLoadFailure,
    PromptTooLarge,
    SessionBusy,
    SessionClosed,
    EmptyPrompt,
    ContextOverflow,
    Backend,
    Internal,
}

impl ChatError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChatError::ModelLoad(_) => ErrorKind::ModelLoadFailure,
            ChatError::PromptTooLarge { .. } => ErrorKind::PromptTooLarge,
            ChatError::SessionBusy => ErrorKind::SessionBusy,
            ChatError::SessionClosed => ErrorKind::SessionClosed,
            ChatError::EmptyPrompt => ErrorKind::EmptyPrompt,
            ChatError::ContextOverflow { .. } => ErrorKind::ContextOverflow,
            ChatError::Backend(_) => ErrorKind::Backend,
            ChatError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the caller can simply retry or fix its request
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ChatError::PromptTooLarge { .. }
                | ChatError::SessionBusy
                | ChatError::EmptyPrompt
                | ChatError::Backend(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_serialize_as_snake_case() {
        let json = serde_json::to_string(&ChatError::SessionBusy.kind()).unwrap();
        assert_eq!(json, "\"session_busy\"");
        let json = serde_json::to_string(&ChatError::PromptTooLarge { required: 10, budget: 5 }.kind()).unwrap();
        assert_eq!(json, "\"prompt_too_large\"");
    }

    #[test]
    fn load_failures_are_fatal() {
        let err = ChatError::from(ModelLoadError::NotFound(PathBuf::from("/nope.gguf")));
        assert_eq!(err.kind(), ErrorKind::ModelLoadFailure);
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("/nope.gguf"));
        assert!(ChatError::EmptyPrompt.is_recoverable());
    }
}
