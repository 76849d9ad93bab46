use serde::{Deserialize, Serialize};

use crate::error::{ChatError, ErrorKind};

/// What the HTTP layer sends back for one prompt.
///
/// Serializes as `{"text": "..."}` or `{"error": "session_busy"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GenerationResult {
    Text { text: String },
    Error { error: ErrorKind },
}

impl GenerationResult {
    pub fn is_error(&self) -> bool {
        matches!(self, GenerationResult::Error { .. })
    }
}

impl From<Result<String, ChatError>> for GenerationResult {
    fn from(result: Result<String, ChatError>) -> Self {
        match result {
            Ok(text) => GenerationResult::Text { text },
            Err(err) => GenerationResult::Error { error: err.kind() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shape() {
        let ok = GenerationResult::from(Ok("olleh".to_string()));
        assert_eq!(serde_json::to_string(&ok).unwrap(), r#"{"text":"olleh"}"#);

        let err = GenerationResult::from(Err(ChatError::EmptyPrompt));
        assert_eq!(serde_json::to_string(&err).unwrap(), r#"{"error":"empty_prompt"}"#);

        let parsed: GenerationResult = serde_json::from_str(r#"{"error":"session_closed"}"#).unwrap();
        assert_eq!(parsed, GenerationResult::Error { error: ErrorKind::SessionClosed });
    }
}
