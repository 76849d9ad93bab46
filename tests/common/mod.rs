#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use weai::gguf::writer::write_metadata_file;
use weai::gguf::GGUFValue;
use weai::llm::backend::{ScriptedBackend, ScriptedLoader, ScriptedProbe};
use weai::llm::{ModelHandle, ModelParams};

/// Trained context length written into fixtures
pub const TRAINED_CONTEXT: i64 = 4096;
pub const BLOCKS: i64 = 8;

/// Writes a tensor-less GGUF file describing a small llama model
pub fn write_model(dir: &Path) -> PathBuf {
    let path = dir.join("tiny.gguf");
    write_metadata_file(
        &path,
        &[
            ("general.architecture", GGUFValue::String("llama".into())),
            ("general.name", GGUFValue::String("tiny-test".into())),
            ("llama.context_length", GGUFValue::Int(TRAINED_CONTEXT)),
            ("llama.block_count", GGUFValue::Int(BLOCKS)),
        ],
    )
    .unwrap();
    path
}

pub struct Fixture {
    // Keeps the model file alive
    pub dir: TempDir,
    pub model: Arc<ModelHandle>,
    pub probe: Arc<ScriptedProbe>,
}

pub fn load(backend: ScriptedBackend, context_size: usize) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let path = write_model(dir.path());
    let loader = ScriptedLoader::new(backend);
    let probe = loader.probe();
    let model = ModelHandle::load(&ModelParams::new(path, context_size, 0), &loader).unwrap();
    Fixture {
        dir,
        model: Arc::new(model),
        probe,
    }
}

/// Replies with `"Assistant: "` and the reversed last user message,
/// remembering every prompt it was shown
pub fn recording_echo() -> (ScriptedBackend, Arc<Mutex<Vec<String>>>) {
    let prompts = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&prompts);
    let backend = ScriptedBackend::new(move |prompt| {
        seen.lock().unwrap().push(prompt.to_string());
        let last = prompt
            .rfind("User: ")
            .map(|i| &prompt[i + "User: ".len()..])
            .and_then(|rest| rest.strip_suffix("\nAssistant:"))
            .unwrap_or("");
        format!("Assistant: {}", last.chars().rev().collect::<String>())
    });
    (backend, prompts)
}
