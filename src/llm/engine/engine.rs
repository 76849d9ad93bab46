use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::ChatError;
use crate::llm::model::ModelHandle;
use crate::llm::session::{Message, Session, SessionConfig, Turn, TurnOutcome};
use super::types::GenerationResult;

/// Single entry point for callers that just want answers.
///
/// The model is loaded by the caller and handed in. The conversation
/// session (and the context it owns) is created on first use; concurrent
/// first calls all wait on the same initialization.
pub struct ChatService {
    model: Arc<ModelHandle>,
    config: SessionConfig,
    session: OnceCell<Session>,
    shut_down: AtomicBool,
}

impl ChatService {
    /// Creates a service over an already loaded model.
    ///
    /// # Arguments
    ///
    /// * `model` - Handle shared with any other service using the same weights
    /// * `config` - System prompt and generation limits for the conversation
    pub fn new(model: Arc<ModelHandle>, config: SessionConfig) -> Self {
        Self {
            model,
            config,
            session: OnceCell::new(),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn model(&self) -> &Arc<ModelHandle> {
        &self.model
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether the session has been created
    pub fn is_ready(&self) -> bool {
        self.session.initialized()
    }

    /// Returns the service session, creating it on the first call.
    ///
    /// Context allocation can be slow, so it runs on the blocking pool.
    pub async fn ensure_ready(&self) -> Result<&Session, ChatError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(ChatError::SessionClosed);
        }
        self.session
            .get_or_try_init(|| async {
                let model = Arc::clone(&self.model);
                let config = self.config.clone();
                info!("Initializing chat session");
                tokio::task::spawn_blocking(move || Session::new(model, config))
                    .await
                    .map_err(|e| ChatError::Internal(format!("session initialization failed: {}", e)))?
            })
            .await
    }

    /// Generates an answer to `prompt` and returns the sanitized text.
    ///
    /// # Returns
    ///
    /// The Assistant text, or an error if:
    /// - `prompt` is blank (`EmptyPrompt`, nothing is recorded)
    /// - a turn is already running (`SessionBusy`)
    /// - the service was shut down (`SessionClosed`)
    /// - the prompt cannot fit the context (`PromptTooLarge`)
    pub async fn generate(&self, prompt: &str) -> Result<String, ChatError> {
        self.complete(prompt).await.map(|outcome| outcome.text)
    }

    /// Like [`ChatService::generate`] but returns the full outcome.
    ///
    /// Dropping the returned future (a caller deadline, a closed request)
    /// cancels the generation it started.
    pub async fn complete(&self, prompt: &str) -> Result<TurnOutcome, ChatError> {
        let turn = self.generate_stream(prompt).await?;
        let outcome = turn.finish().await?;
        debug!(finish = ?outcome.finish_reason, tokens = outcome.generated_tokens, "Generated response");
        Ok(outcome)
    }

    /// Starts a turn and hands back its fragment stream.
    ///
    /// A turn that was cancelled or abandoned is waited out first, so a
    /// caller that gave up on the previous answer is not refused as busy.
    pub async fn generate_stream(&self, prompt: &str) -> Result<Turn, ChatError> {
        if prompt.trim().is_empty() {
            return Err(ChatError::EmptyPrompt);
        }
        let session = self.ensure_ready().await?;
        session.settle().await;
        session.submit(prompt)
    }

    /// [`ChatService::generate`] folded into the wire result.
    pub async fn respond(&self, prompt: &str) -> GenerationResult {
        GenerationResult::from(self.generate(prompt).await)
    }

    /// Asks for a short analysis of a file's contents.
    pub async fn analyze_file(&self, filename: &str, content: &str) -> Result<String, ChatError> {
        if content.trim().is_empty() {
            return Err(ChatError::EmptyPrompt);
        }
        let prompt = format!(
            "Analyze the contents of the file \"{}\":\n{}\nGive a short answer:",
            filename, content
        );
        self.generate(&prompt).await
    }

    /// Cancels the running turn, if any
    pub fn cancel(&self) -> bool {
        self.session.get().is_some_and(Session::cancel)
    }

    pub fn history(&self) -> Vec<Message> {
        self.session.get().map(Session::history).unwrap_or_default()
    }

    pub fn reset_conversation(&self) -> Result<(), ChatError> {
        match self.session.get() {
            Some(session) => session.reset(),
            None => Ok(()),
        }
    }

    /// Closes the session; later calls fail with `SessionClosed`.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        if let Some(session) = self.session.get() {
            session.close();
        }
        info!("Chat service shut down");
    }
}
