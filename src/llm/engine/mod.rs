mod engine;
mod types;

pub use engine::ChatService;
pub use types::GenerationResult;
