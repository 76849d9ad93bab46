mod context;
pub mod generation;
pub mod prompt;
mod session;
mod types;

pub use context::InferenceContext;
pub use generation::{Generation, StopScanner};
pub use prompt::{fit_to_budget, render, FittedPrompt};
pub use session::{CancelHandle, Session, Turn};
pub use types::{
    FinishReason, GenerationRequest, Message, Role, SessionConfig, SessionState, TurnOutcome,
};
