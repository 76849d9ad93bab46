//! llama.cpp backend through the `llama_cpp` crate.

use std::path::Path;
use std::sync::Arc;
use llama_cpp::standard_sampler::{SamplerStage, StandardSampler};
use llama_cpp::{CompletionHandle, LlamaModel, LlamaParams, LlamaSession, SessionParams};
use tracing::info;

use super::backend::{BackendError, BackendLoader, Evaluator, LoadParams, ModelBackend, SamplingConfig, Token};

/// Batch size used when feeding prompts
const N_BATCH: u32 = 512;

pub struct LlamaBackend {
    model: LlamaModel,
}

impl ModelBackend for LlamaBackend {
    fn tokenize(&self, text: &str) -> Result<Vec<Token>, BackendError> {
        let tokens = self.model
            .tokenize_bytes(text.as_bytes(), true, false)
            .map_err(|e| BackendError::Tokenize(e.to_string()))?;
        Ok(tokens.into_iter().map(|t| Token(t.0)).collect())
    }

    fn token_bytes(&self, token: Token) -> Vec<u8> {
        self.model.detokenize(llama_cpp::Token(token.0)).to_vec()
    }

    fn eos(&self) -> Token {
        Token(self.model.eos().0)
    }

    fn create_evaluator(&self, capacity: usize) -> Result<Box<dyn Evaluator>, BackendError> {
        let n_ctx = u32::try_from(capacity)
            .map_err(|_| BackendError::Context(format!("capacity {} is too large", capacity)))?;
        let session_params = SessionParams {
            n_ctx,
            n_batch: N_BATCH.min(n_ctx),
            ..Default::default()
        };

        info!("Creating LlamaSession with context size: {}", n_ctx);
        let session = self.model
            .create_session(session_params)
            .map_err(|e| BackendError::Context(e.to_string()))?;

        Ok(Box::new(LlamaEvaluator {
            model: self.model.clone(),
            session,
            completion: None,
            capacity,
            len: 0,
        }))
    }
}

struct LlamaEvaluator {
    model: LlamaModel,
    session: LlamaSession,
    /// Running completion. llama_cpp samples and commits tokens on its own
    /// thread, so the handle is dropped whenever the sequence is edited.
    completion: Option<CompletionHandle>,
    capacity: usize,
    /// Tokens handed out or ingested so far; the session may run ahead of this
    len: usize,
}

fn standard_sampler(sampling: &SamplingConfig) -> StandardSampler {
    match sampling {
        SamplingConfig::Greedy => StandardSampler::new_greedy(),
        SamplingConfig::Standard { temperature, top_k, top_p, repeat_penalty, repeat_last_n } => {
            StandardSampler::new_softmax(
                vec![
                    SamplerStage::RepetitionPenalty {
                        repetition_penalty: *repeat_penalty,
                        frequency_penalty: 0.0,
                        presence_penalty: 0.0,
                        last_n: i32::try_from(*repeat_last_n).unwrap_or(i32::MAX),
                    },
                    SamplerStage::Temperature(*temperature),
                    SamplerStage::TopK(*top_k),
                    SamplerStage::TopP(*top_p),
                ],
                1,
            )
        }
    }
}

impl Evaluator for LlamaEvaluator {
    fn ingest(&mut self, tokens: &[Token]) -> Result<(), BackendError> {
        self.completion = None;
        self.session.truncate_context(self.len);
        let tokens: Vec<llama_cpp::Token> = tokens.iter().map(|t| llama_cpp::Token(t.0)).collect();
        self.session
            .advance_context_with_tokens(&tokens)
            .map_err(|e| BackendError::Evaluate(e.to_string()))?;
        self.len += tokens.len();
        Ok(())
    }

    fn next_token(&mut self, sampling: &SamplingConfig) -> Result<Token, BackendError> {
        if self.completion.is_none() {
            let remaining = self.capacity.saturating_sub(self.len);
            let handle = self.session
                .start_completing_with(standard_sampler(sampling), remaining)
                .map_err(|e| BackendError::Evaluate(e.to_string()))?;
            self.completion = Some(handle);
        }

        let next = self.completion.as_mut().and_then(|handle| handle.next());
        self.len += 1;
        match next {
            Some(token) => Ok(Token(token.0)),
            None => Ok(Token(self.model.eos().0)),
        }
    }

    fn truncate(&mut self, len: usize) -> Result<(), BackendError> {
        self.completion = None;
        self.len = self.len.min(len);
        self.session.truncate_context(self.len);
        Ok(())
    }
}

pub struct LlamaLoader;

impl BackendLoader for LlamaLoader {
    fn name(&self) -> &'static str {
        "llama"
    }

    fn load(&self, path: &Path, params: &LoadParams) -> Result<Arc<dyn ModelBackend>, BackendError> {
        let llama_params = LlamaParams {
            n_gpu_layers: params.gpu_layers,
            use_mmap: params.use_mmap,
            use_mlock: params.use_mlock,
            ..Default::default()
        };
        tracing::info!(
            n_gpu_layers = params.gpu_layers,
            use_mmap = params.use_mmap,
            use_mlock = params.use_mlock,
            "Loading model via llama_cpp"
        );
        let model = LlamaModel::load_from_file(path, llama_params)
            .map_err(|e| BackendError::Load(e.to_string()))?;
        Ok(Arc::new(LlamaBackend { model }))
    }
}
