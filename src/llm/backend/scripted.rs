//! Deterministic in-process backend.
//!
//! Tokens are Unicode scalar values, so one character is one token and
//! token counts are easy to reason about. The reply to a prompt is produced
//! by a responder closure, then handed out one character per `next_token`
//! call followed by the end-of-sequence token. With byte tokens enabled the
//! reply goes out one UTF-8 byte at a time instead.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::debug;

use super::backend::{BackendError, BackendLoader, Evaluator, LoadParams, ModelBackend, SamplingConfig, Token};

const EOS: Token = Token(-1);
/// Byte tokens live above the Unicode range
const BYTE_BASE: i32 = 0x20_0000;

type Responder = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Counters shared between a [`ScriptedBackend`] and whoever wants to observe it
#[derive(Debug, Default)]
pub struct ScriptedProbe {
    loads: AtomicUsize,
    evaluators_created: AtomicUsize,
    tokens_sampled: AtomicUsize,
    reserved_layers: AtomicUsize,
    released: AtomicBool,
}

impl ScriptedProbe {
    /// How many times the backend was loaded
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// How many evaluators (contexts) were allocated
    pub fn evaluators_created(&self) -> usize {
        self.evaluators_created.load(Ordering::SeqCst)
    }

    /// How many tokens were sampled across all evaluators
    pub fn tokens_sampled(&self) -> usize {
        self.tokens_sampled.load(Ordering::SeqCst)
    }

    /// Accelerator layers currently reserved
    pub fn reserved_layers(&self) -> usize {
        self.reserved_layers.load(Ordering::SeqCst)
    }

    /// Whether a loaded instance has been dropped and its reservation returned
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

/// Stands in for accelerator memory. Returned on drop.
#[derive(Debug)]
struct DeviceReservation {
    layers: u32,
    probe: Arc<ScriptedProbe>,
}

impl DeviceReservation {
    fn acquire(layers: u32, probe: Arc<ScriptedProbe>) -> Self {
        probe.reserved_layers.fetch_add(layers as usize, Ordering::SeqCst);
        Self { layers, probe }
    }
}

impl Drop for DeviceReservation {
    fn drop(&mut self) {
        self.probe.reserved_layers.fetch_sub(self.layers as usize, Ordering::SeqCst);
        debug!(layers = self.layers, "Released accelerator reservation");
    }
}

pub struct ScriptedBackend {
    responder: Responder,
    token_delay: Option<Duration>,
    byte_tokens: bool,
    /// Successful samples left before one evaluator call fails
    failure: Arc<Mutex<Option<usize>>>,
    probe: Arc<ScriptedProbe>,
    reservation: Option<DeviceReservation>,
}

impl ScriptedBackend {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(responder),
            token_delay: None,
            byte_tokens: false,
            failure: Arc::new(Mutex::new(None)),
            probe: Arc::new(ScriptedProbe::default()),
            reservation: None,
        }
    }

    /// Always answers with the same text
    pub fn fixed(reply: impl Into<String>) -> Self {
        let reply = reply.into();
        Self::new(move |_| reply.clone())
    }

    /// Answers `"Assistant: "` followed by the last user message reversed
    pub fn echo_reversed() -> Self {
        Self::new(|prompt| {
            let reversed: String = last_user_message(prompt).chars().rev().collect();
            format!("Assistant: {}", reversed)
        })
    }

    /// Sleeps this long before handing out each token
    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = Some(delay);
        self
    }

    /// Spells replies one UTF-8 byte per token, like byte-fallback vocabularies
    pub fn with_byte_tokens(mut self) -> Self {
        self.byte_tokens = true;
        self
    }

    /// Fails the sampling call that follows `samples` successful ones, once
    pub fn failing_after(self, samples: usize) -> Self {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(samples);
        self
    }

    pub fn probe(&self) -> Arc<ScriptedProbe> {
        Arc::clone(&self.probe)
    }
}

impl Drop for ScriptedBackend {
    fn drop(&mut self) {
        if self.reservation.take().is_some() {
            self.probe.released.store(true, Ordering::SeqCst);
        }
    }
}

/// Text of the last `User: ` turn in a rendered prompt
fn last_user_message(prompt: &str) -> &str {
    let Some(start) = prompt.rfind("User: ") else {
        return "";
    };
    let rest = &prompt[start + "User: ".len()..];
    let end = rest.rfind("\nAssistant:").unwrap_or(rest.len());
    &rest[..end]
}

fn token_bytes(token: Token) -> Vec<u8> {
    if token.0 >= BYTE_BASE {
        return u8::try_from(token.0 - BYTE_BASE).map(|b| vec![b]).unwrap_or_default();
    }
    u32::try_from(token.0)
        .ok()
        .and_then(char::from_u32)
        .map(|c| c.to_string().into_bytes())
        .unwrap_or_default()
}

fn decode(tokens: &[Token]) -> String {
    let bytes: Vec<u8> = tokens.iter().flat_map(|t| token_bytes(*t)).collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

impl ModelBackend for ScriptedBackend {
    fn tokenize(&self, text: &str) -> Result<Vec<Token>, BackendError> {
        Ok(text.chars().map(|c| Token(c as i32)).collect())
    }

    fn token_bytes(&self, token: Token) -> Vec<u8> {
        token_bytes(token)
    }

    fn eos(&self) -> Token {
        EOS
    }

    fn create_evaluator(&self, capacity: usize) -> Result<Box<dyn Evaluator>, BackendError> {
        if capacity == 0 {
            return Err(BackendError::Context("capacity must be non-zero".into()));
        }
        self.probe.evaluators_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedEvaluator {
            responder: Arc::clone(&self.responder),
            token_delay: self.token_delay,
            byte_tokens: self.byte_tokens,
            failure: Arc::clone(&self.failure),
            probe: Arc::clone(&self.probe),
            capacity,
            tokens: Vec::with_capacity(capacity),
            pending: None,
        }))
    }
}

struct ScriptedEvaluator {
    responder: Responder,
    token_delay: Option<Duration>,
    byte_tokens: bool,
    failure: Arc<Mutex<Option<usize>>>,
    probe: Arc<ScriptedProbe>,
    capacity: usize,
    tokens: Vec<Token>,
    /// Reply still to be handed out; dropped whenever the sequence is edited
    pending: Option<VecDeque<Token>>,
}

impl Evaluator for ScriptedEvaluator {
    fn ingest(&mut self, tokens: &[Token]) -> Result<(), BackendError> {
        if self.tokens.len() + tokens.len() > self.capacity {
            return Err(BackendError::Evaluate(format!(
                "{} tokens do not fit, {} of {} used",
                tokens.len(),
                self.tokens.len(),
                self.capacity
            )));
        }
        self.tokens.extend_from_slice(tokens);
        self.pending = None;
        Ok(())
    }

    fn next_token(&mut self, _sampling: &SamplingConfig) -> Result<Token, BackendError> {
        if self.tokens.len() >= self.capacity {
            return Err(BackendError::Evaluate("context is full".into()));
        }
        {
            let mut failure = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(left) = failure.as_mut() {
                if *left == 0 {
                    *failure = None;
                    return Err(BackendError::Evaluate("scripted failure".into()));
                }
                *left -= 1;
            }
        }

        let responder = &self.responder;
        let tokens = &self.tokens;
        let byte_tokens = self.byte_tokens;
        let pending = self.pending.get_or_insert_with(|| {
            let reply = responder(&decode(tokens));
            if byte_tokens {
                reply.bytes().map(|b| Token(BYTE_BASE + i32::from(b))).collect()
            } else {
                reply.chars().map(|c| Token(c as i32)).collect()
            }
        });
        let token = pending.pop_front().unwrap_or(EOS);

        if let Some(delay) = self.token_delay {
            thread::sleep(delay);
        }
        self.probe.tokens_sampled.fetch_add(1, Ordering::SeqCst);
        self.tokens.push(token);
        Ok(token)
    }

    fn truncate(&mut self, len: usize) -> Result<(), BackendError> {
        self.tokens.truncate(len);
        self.pending = None;
        Ok(())
    }
}

/// Hands out fresh [`ScriptedBackend`] instances sharing one responder and probe
pub struct ScriptedLoader {
    template: ScriptedBackend,
}

impl ScriptedLoader {
    pub fn new(template: ScriptedBackend) -> Self {
        Self { template }
    }

    pub fn probe(&self) -> Arc<ScriptedProbe> {
        self.template.probe()
    }
}

impl BackendLoader for ScriptedLoader {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn load(&self, path: &Path, params: &LoadParams) -> Result<Arc<dyn ModelBackend>, BackendError> {
        debug!(path = %path.display(), gpu_layers = params.gpu_layers, "Loading scripted backend");
        let probe = self.template.probe();
        probe.loads.fetch_add(1, Ordering::SeqCst);
        let reservation = (params.gpu_layers > 0)
            .then(|| DeviceReservation::acquire(params.gpu_layers, Arc::clone(&probe)));
        Ok(Arc::new(ScriptedBackend {
            responder: Arc::clone(&self.template.responder),
            token_delay: self.template.token_delay,
            byte_tokens: self.template.byte_tokens,
            failure: Arc::clone(&self.template.failure),
            probe,
            reservation,
        }))
    }
}
