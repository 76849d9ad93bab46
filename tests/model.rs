mod common;

use std::fs;
use std::sync::Arc;

use weai::llm::backend::{ScriptedBackend, ScriptedLoader};
use weai::llm::{ModelHandle, ModelParams};
use weai::ModelLoadError;

#[test]
fn loads_valid_file() {
    let fixture = common::load(ScriptedBackend::fixed("hi"), 512);
    let summary = fixture.model.summary();
    assert_eq!(summary.name, "tiny-test");
    assert_eq!(summary.architecture.as_deref(), Some("llama"));
    assert_eq!(summary.context_length, Some(common::TRAINED_CONTEXT as u64));
    assert_eq!(fixture.model.context_size(), 512);
    assert_eq!(fixture.probe.loads(), 1);
}

#[test]
fn missing_file_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let loader = ScriptedLoader::new(ScriptedBackend::fixed("hi"));
    let err = ModelHandle::load(&ModelParams::new(dir.path().join("absent.gguf"), 512, 0), &loader).unwrap_err();
    assert!(matches!(err, ModelLoadError::NotFound(_)));
    assert_eq!(loader.probe().loads(), 0);
}

#[test]
fn non_gguf_file_is_unsupported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("weights.bin");
    fs::write(&path, b"PK\x03\x04 definitely not gguf").unwrap();
    let loader = ScriptedLoader::new(ScriptedBackend::fixed("hi"));
    let err = ModelHandle::load(&ModelParams::new(path, 512, 0), &loader).unwrap_err();
    assert!(matches!(err, ModelLoadError::UnsupportedFormat { .. }));
    assert_eq!(loader.probe().loads(), 0);
}

#[test]
fn capacity_beyond_trained_length_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = common::write_model(dir.path());
    let loader = ScriptedLoader::new(ScriptedBackend::fixed("hi"));
    let params = ModelParams::new(path, (common::TRAINED_CONTEXT + 1) as usize, 0);
    let err = ModelHandle::load(&params, &loader).unwrap_err();
    assert!(matches!(err, ModelLoadError::InvalidParams(_)));
    assert_eq!(loader.probe().loads(), 0);
}

#[test]
fn too_many_accelerator_layers_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = common::write_model(dir.path());
    let loader = ScriptedLoader::new(ScriptedBackend::fixed("hi"));

    let ok = ModelParams::new(&path, 512, (common::BLOCKS + 1) as u32);
    assert!(ModelHandle::load(&ok, &loader).is_ok());

    let too_many = ModelParams::new(&path, 512, (common::BLOCKS + 2) as u32);
    assert!(matches!(
        ModelHandle::load(&too_many, &loader),
        Err(ModelLoadError::InvalidParams(_))
    ));
}

#[test]
fn accelerator_memory_released_with_last_reference() {
    let dir = tempfile::tempdir().unwrap();
    let path = common::write_model(dir.path());
    let loader = ScriptedLoader::new(ScriptedBackend::fixed("hi"));
    let probe = loader.probe();

    let model = Arc::new(ModelHandle::load(&ModelParams::new(path, 512, 4), &loader).unwrap());
    assert_eq!(probe.reserved_layers(), 4);

    let context = model.create_context().unwrap();
    drop(model);
    // The context still shares the weights
    assert_eq!(probe.reserved_layers(), 4);
    assert!(!probe.is_released());

    drop(context);
    assert_eq!(probe.reserved_layers(), 0);
    assert!(probe.is_released());
}

#[test]
fn contexts_are_independent() {
    let fixture = common::load(ScriptedBackend::fixed("hi"), 64);
    let mut first = fixture.model.create_context().unwrap();
    let second = fixture.model.create_context().unwrap();
    first.ingest(&fixture.model.tokenize("abc").unwrap()).unwrap();
    assert_eq!(first.len(), 3);
    assert!(second.is_empty());
    assert_eq!(fixture.probe.evaluators_created(), 2);
}
