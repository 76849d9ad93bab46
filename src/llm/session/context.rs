use std::sync::Arc;
use tracing::{debug, trace};

use crate::error::ChatError;
use crate::llm::backend::{Evaluator, SamplingConfig, Token};
use crate::llm::model::ModelHandle;

/// Fixed-capacity token buffer bound to one model.
///
/// Mirrors the backend's evaluation state: `tokens` is exactly the sequence
/// the evaluator has seen, prompt and generated output alike. The fill level
/// never exceeds the capacity; callers that try are refused with
/// [`ChatError::ContextOverflow`] before the backend is touched.
pub struct InferenceContext {
    model: Arc<ModelHandle>,
    evaluator: Box<dyn Evaluator>,
    capacity: usize,
    tokens: Vec<Token>,
}

impl InferenceContext {
    pub fn new(model: Arc<ModelHandle>) -> Result<Self, ChatError> {
        let capacity = model.context_size();
        debug!(capacity, "Creating inference context");
        let evaluator = model.backend().create_evaluator(capacity)?;
        Ok(Self {
            model,
            evaluator,
            capacity,
            tokens: Vec::with_capacity(capacity),
        })
    }

    pub fn model(&self) -> &Arc<ModelHandle> {
        &self.model
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Tokens currently held
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.tokens.len()
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Empties the context, keeping the allocation.
    pub fn reset(&mut self) -> Result<(), ChatError> {
        self.evaluator.clear()?;
        self.tokens.clear();
        Ok(())
    }

    /// Appends tokens after the ones already held.
    pub fn ingest(&mut self, tokens: &[Token]) -> Result<(), ChatError> {
        if tokens.len() > self.remaining() {
            return Err(ChatError::ContextOverflow {
                requested: tokens.len(),
                remaining: self.remaining(),
            });
        }
        self.evaluator.ingest(tokens)?;
        self.tokens.extend_from_slice(tokens);
        Ok(())
    }

    /// Makes `prompt` the held sequence and returns how many tokens had to be fed.
    ///
    /// The longest common prefix with the current contents is kept as is.
    /// When the whole prompt is already cached its last token is fed again
    /// so the next sample is taken right after the prompt.
    pub fn load_prompt(&mut self, prompt: &[Token]) -> Result<usize, ChatError> {
        if prompt.len() > self.capacity {
            return Err(ChatError::ContextOverflow {
                requested: prompt.len(),
                remaining: self.capacity,
            });
        }

        let mut keep = self.tokens
            .iter()
            .zip(prompt)
            .take_while(|(held, wanted)| held == wanted)
            .count();
        if keep == prompt.len() && keep > 0 {
            keep -= 1;
        }

        self.evaluator.truncate(keep)?;
        self.tokens.truncate(keep);
        self.ingest(&prompt[keep..])?;

        trace!(reused = keep, fed = prompt.len() - keep, "Prompt loaded");
        Ok(prompt.len() - keep)
    }

    /// Samples one token and commits it to the context.
    pub fn next_token(&mut self, sampling: &SamplingConfig) -> Result<Token, ChatError> {
        if self.remaining() == 0 {
            return Err(ChatError::ContextOverflow { requested: 1, remaining: 0 });
        }
        let token = self.evaluator.next_token(sampling)?;
        self.tokens.push(token);
        Ok(token)
    }
}
