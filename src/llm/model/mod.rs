mod model;
mod types;

pub use model::ModelHandle;
pub use types::{ModelParams, ModelSummary};
