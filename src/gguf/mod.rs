mod gguf;
mod gguf_utils;
mod types;
pub mod writer;

// Re-export from types
pub use types::{GGUFError, GGUFValue};
// Re-export from gguf
pub use gguf::GGUFReader;
// Re-export from gguf_utils
pub use gguf_utils::is_gguf_file;
