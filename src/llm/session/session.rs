use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use async_stream::stream;
use futures::stream::Stream;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::error::ChatError;
use crate::llm::model::ModelHandle;
use crate::llm::sanitize::sanitize;
use super::context::InferenceContext;
use super::generation::{self, Generation};
use super::prompt::{self, FittedPrompt};
use super::types::{FinishReason, Message, Role, SessionConfig, SessionState, TurnOutcome};

/// Cancels the generation it was handed out for.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One in-flight generation.
///
/// Fragments arrive as soon as the worker produces them. [`Turn::finish`]
/// waits for the outcome. Dropping the `Turn` before `finish` returns
/// (including dropping a `finish` future, e.g. on a timeout) cancels the
/// generation; the partial answer is still recorded.
#[derive(Debug)]
pub struct Turn {
    fragments: mpsc::Receiver<String>,
    task: JoinHandle<Result<TurnOutcome, ChatError>>,
    cancel: CancelHandle,
    finished: bool,
}

impl Turn {
    /// Next streamed fragment, `None` once generation has stopped
    pub async fn next_fragment(&mut self) -> Option<String> {
        self.fragments.recv().await
    }

    pub fn fragments(&mut self) -> impl Stream<Item = String> + '_ {
        stream! {
            while let Some(fragment) = self.fragments.recv().await {
                yield fragment;
            }
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Waits for the turn to end. Fragments not yet read are discarded.
    pub async fn finish(mut self) -> Result<TurnOutcome, ChatError> {
        self.fragments.close();
        let joined = (&mut self.task).await;
        self.finished = true;
        joined.map_err(|e| ChatError::Internal(format!("generation task failed: {}", e)))?
    }
}

impl Drop for Turn {
    fn drop(&mut self) {
        if !self.finished && !self.task.is_finished() {
            debug!("Turn abandoned, cancelling generation");
            self.cancel.cancel();
        }
    }
}

/// One conversation over its own context.
///
/// Cloning yields another handle to the same conversation. Turns run one at
/// a time; a `submit` while one is running is refused with
/// [`ChatError::SessionBusy`].
#[derive(Clone)]
pub struct Session {
    shared: Arc<SessionShared>,
}

struct SessionShared {
    id: Uuid,
    model: Arc<ModelHandle>,
    config: SessionConfig,
    turns: AtomicUsize,
    /// Signalled whenever a turn hands the session back
    settled: Notify,
    inner: Mutex<SessionInner>,
}

struct SessionInner {
    state: SessionState,
    history: Vec<Message>,
    /// Lent to the worker while a turn runs
    context: Option<InferenceContext>,
    cancel: Option<Arc<AtomicBool>>,
}

impl Session {
    pub fn new(model: Arc<ModelHandle>, config: SessionConfig) -> Result<Self, ChatError> {
        let context = model.create_context()?;
        let id = Uuid::new_v4();
        let history = config
            .system_prompt
            .as_ref()
            .map(|text| vec![Message::system(text.clone())])
            .unwrap_or_default();

        info!(session = %id, capacity = context.capacity(), "Session ready");
        Ok(Self {
            shared: Arc::new(SessionShared {
                id,
                model,
                config,
                turns: AtomicUsize::new(0),
                settled: Notify::new(),
                inner: Mutex::new(SessionInner {
                    state: SessionState::Ready,
                    history,
                    context: Some(context),
                    cancel: None,
                }),
            }),
        })
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    /// Snapshot of the conversation so far
    pub fn history(&self) -> Vec<Message> {
        self.shared.lock().history.clone()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    pub fn model(&self) -> &Arc<ModelHandle> {
        &self.shared.model
    }

    /// Starts a turn for `text`.
    ///
    /// The user message is appended and the prompt truncated to fit before
    /// this returns, so every error here leaves the session untouched.
    /// Generation itself runs on the blocking pool of the current runtime.
    pub fn submit(&self, text: &str) -> Result<Turn, ChatError> {
        let runtime = Handle::try_current()
            .map_err(|_| ChatError::Internal("submit must be called within a tokio runtime".into()))?;
        let shared = &self.shared;
        let mut inner = shared.lock();

        match inner.state {
            SessionState::Closed => return Err(ChatError::SessionClosed),
            SessionState::Generating => return Err(ChatError::SessionBusy),
            SessionState::Ready => {}
        }
        if text.trim().is_empty() {
            return Err(ChatError::EmptyPrompt);
        }

        inner.history.push(Message::user(text));
        let budget = shared.model.context_size().saturating_sub(shared.config.request.max_tokens);
        let fitted = match prompt::fit_to_budget(&inner.history, budget, |t| shared.model.tokenize(t)) {
            Ok(fitted) => fitted,
            Err(err) => {
                inner.history.pop();
                warn!(session = %shared.id, %err, "Prompt rejected");
                return Err(err);
            }
        };

        let context = match inner.context.take() {
            Some(context) => context,
            None => match shared.model.create_context() {
                Ok(context) => context,
                Err(err) => {
                    inner.history.pop();
                    return Err(err);
                }
            },
        };

        let cancel = Arc::new(AtomicBool::new(false));
        inner.cancel = Some(Arc::clone(&cancel));
        inner.state = SessionState::Generating;
        drop(inner);

        let turn = shared.turns.fetch_add(1, Ordering::SeqCst) + 1;
        let span = info_span!("turn", session = %shared.id, turn);
        let (tx, rx) = mpsc::channel(shared.config.stream_buffer.max(1));
        let worker = Arc::clone(shared);
        let flag = Arc::clone(&cancel);

        let task = runtime.spawn_blocking(move || {
            let _entered = span.enter();
            let outcome = worker.run_turn(context, fitted, &flag, tx);
            worker.settled.notify_waiters();
            outcome
        });

        Ok(Turn {
            fragments: rx,
            task,
            cancel: CancelHandle(cancel),
            finished: false,
        })
    }

    /// Waits for a cancelled turn to wind down.
    ///
    /// Returns at once when no turn is running or the running one was not
    /// cancelled. A cancelled worker stops at its next token, so the wait
    /// is short.
    pub async fn settle(&self) {
        loop {
            let settled = self.shared.settled.notified();
            let winding_down = self
                .shared
                .lock()
                .cancel
                .as_ref()
                .is_some_and(|flag| flag.load(Ordering::SeqCst));
            if !winding_down {
                return;
            }
            settled.await;
        }
    }

    /// Asks the running turn to stop. Returns whether one was running.
    pub fn cancel(&self) -> bool {
        match &self.shared.lock().cancel {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Starts over from the standing System message, reusing the context.
    pub fn reset(&self) -> Result<(), ChatError> {
        let mut inner = self.shared.lock();
        match inner.state {
            SessionState::Closed => return Err(ChatError::SessionClosed),
            SessionState::Generating => return Err(ChatError::SessionBusy),
            SessionState::Ready => {}
        }

        let keep = usize::from(inner.history.first().is_some_and(|m| m.role == Role::System));
        inner.history.truncate(keep);
        if let Some(context) = inner.context.as_mut() {
            if let Err(err) = context.reset() {
                inner.context = None;
                return Err(err);
            }
        }
        info!(session = %self.shared.id, "Conversation reset");
        Ok(())
    }

    /// Ends the session. A running turn is cancelled and still delivers
    /// its partial outcome; the context is released.
    pub fn close(&self) {
        let mut inner = self.shared.lock();
        if inner.state == SessionState::Closed {
            return;
        }
        if let Some(flag) = inner.cancel.as_ref() {
            flag.store(true, Ordering::SeqCst);
        }
        inner.state = SessionState::Closed;
        inner.context = None;
        info!(session = %self.shared.id, "Session closed");
    }
}

impl SessionShared {
    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run_turn(
        &self,
        mut context: InferenceContext,
        prompt: FittedPrompt,
        cancel: &AtomicBool,
        tx: mpsc::Sender<String>,
    ) -> Result<TurnOutcome, ChatError> {
        let request = &self.config.request;
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            generation::drive(&mut context, &prompt.tokens, request, cancel, move |fragment| {
                if tx.blocking_send(fragment.to_string()).is_err() {
                    debug!("Fragment receiver dropped");
                }
            })
        }))
        .unwrap_or_else(|_| Err(ChatError::Internal("generation worker panicked".into())));

        let mut inner = self.lock();
        inner.cancel = None;
        let closed = inner.state == SessionState::Closed;

        match result {
            Ok(Generation { raw, finish, generated }) => {
                let text = sanitize(&raw);
                inner.history.push(Message::assistant(text.clone()));
                if finish == FinishReason::Cancelled {
                    warn!(generated, "Turn cancelled");
                }
                if !closed {
                    inner.context = Some(context);
                    inner.state = SessionState::Ready;
                }
                info!(generated, ?finish, prompt_tokens = prompt.tokens.len(), "Turn complete");
                Ok(TurnOutcome {
                    text,
                    raw,
                    finish_reason: finish,
                    generated_tokens: generated,
                    prompt_tokens: prompt.tokens.len(),
                    dropped_messages: prompt.dropped,
                })
            }
            Err(err) => {
                error!(%err, "Turn failed");
                if inner.history.last().is_some_and(|m| m.role == Role::User) {
                    inner.history.pop();
                }
                if !closed {
                    // Contents are unknown after a failure
                    match context.reset() {
                        Ok(()) => inner.context = Some(context),
                        Err(reset_err) => warn!(%reset_err, "Dropping context that failed to reset"),
                    }
                    inner.state = SessionState::Ready;
                }
                Err(err)
            }
        }
    }
}
