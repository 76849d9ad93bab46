// Declare submodules
pub mod backend;
pub mod engine;
pub mod model;
pub mod sanitize;
pub mod session;

// Re-export types for external use
pub use engine::{ChatService, GenerationResult};
pub use model::{ModelHandle, ModelParams, ModelSummary};
pub use sanitize::sanitize;
pub use session::{
    CancelHandle, FinishReason, GenerationRequest, Message, Role, Session, SessionConfig, SessionState, Turn,
    TurnOutcome,
};
