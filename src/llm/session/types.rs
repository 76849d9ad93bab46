use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::llm::backend::SamplingConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Marker used when rendering a prompt
    pub fn label(&self) -> &'static str {
        match self {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One entry of a conversation. Never edited after it is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            created_at: Utc::now(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }
}

/// Per-turn generation limits.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// Upper bound on generated tokens
    pub max_tokens: usize,
    /// Generation halts as soon as one of these appears in the output
    pub stop_sequences: Vec<String>,
    pub sampling: SamplingConfig,
}

impl Default for GenerationRequest {
    fn default() -> Self {
        Self {
            max_tokens: 256,
            stop_sequences: vec!["User:".to_string()],
            sampling: SamplingConfig::default(),
        }
    }
}

/// Why a turn stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    StopSequence,
    MaxTokens,
    EndOfSequence,
    Cancelled,
}

/// Result of one completed (or cancelled) turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnOutcome {
    /// Sanitized answer, as stored in the history
    pub text: String,
    /// Generated text with the stop sequence and everything after it removed
    pub raw: String,
    pub finish_reason: FinishReason,
    pub generated_tokens: usize,
    pub prompt_tokens: usize,
    /// Messages left out of the prompt to make it fit
    pub dropped_messages: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Ready,
    Generating,
    Closed,
}

/// How a session is set up and how it generates.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Standing instruction kept at the head of the history
    pub system_prompt: Option<String>,
    pub request: GenerationRequest,
    /// Fragments buffered between the generation worker and the consumer
    pub stream_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            request: GenerationRequest::default(),
            stream_buffer: 32,
        }
    }
}
