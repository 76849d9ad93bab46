mod common;

use std::sync::Arc;
use std::time::Duration;
use futures::StreamExt;

use weai::llm::backend::ScriptedBackend;
use weai::llm::{ChatService, FinishReason, GenerationResult, Role, SessionConfig};
use weai::{ChatError, ErrorKind};

fn service(backend: ScriptedBackend) -> (common::Fixture, ChatService) {
    let fixture = common::load(backend, 512);
    let service = ChatService::new(Arc::clone(&fixture.model), SessionConfig::default());
    (fixture, service)
}

#[tokio::test]
async fn echo_model_answer_is_sanitized() {
    let (_fixture, service) = service(ScriptedBackend::echo_reversed());
    assert_eq!(service.generate("hello").await.unwrap(), "olleh");
}

#[tokio::test]
async fn blank_prompts_are_rejected_without_side_effects() {
    let (fixture, service) = service(ScriptedBackend::echo_reversed());

    assert!(matches!(service.generate("").await, Err(ChatError::EmptyPrompt)));
    assert!(matches!(service.generate("   ").await, Err(ChatError::EmptyPrompt)));
    assert!(!service.is_ready());
    assert_eq!(fixture.probe.evaluators_created(), 0);

    service.generate("hi").await.unwrap();
    let before = service.history();
    assert!(matches!(service.generate("\n\t").await, Err(ChatError::EmptyPrompt)));
    assert_eq!(service.history(), before);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_calls_initialize_once() {
    let (fixture, service) = service(ScriptedBackend::echo_reversed());
    let service = Arc::new(service);

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.ensure_ready().await.map(|session| session.id()) })
        })
        .collect();

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap());
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(fixture.probe.evaluators_created(), 1);
}

#[tokio::test]
async fn conversation_accumulates_across_calls() {
    let (_fixture, service) = service(ScriptedBackend::echo_reversed());
    service.generate("abc").await.unwrap();
    service.generate("xyz").await.unwrap();

    let roles: Vec<Role> = service.history().iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User, Role::Assistant]);

    service.reset_conversation().unwrap();
    assert!(service.history().is_empty());
}

#[tokio::test]
async fn respond_produces_wire_result() {
    let (_fixture, service) = service(ScriptedBackend::echo_reversed());

    let ok = service.respond("hello").await;
    assert_eq!(ok, GenerationResult::Text { text: "olleh".into() });
    assert_eq!(serde_json::to_string(&ok).unwrap(), r#"{"text":"olleh"}"#);

    let empty = service.respond(" ").await;
    assert_eq!(empty, GenerationResult::Error { error: ErrorKind::EmptyPrompt });
}

#[tokio::test]
async fn analyze_file_wraps_content_in_instruction() {
    let (backend, prompts) = common::recording_echo();
    let (_fixture, service) = service(backend);

    service.analyze_file("notes.txt", "hello world").await.unwrap();
    let prompt = prompts.lock().unwrap().last().cloned().unwrap();
    assert!(prompt.contains("User: Analyze the contents of the file \"notes.txt\":\nhello world\nGive a short answer:\n"));

    assert!(matches!(
        service.analyze_file("empty.txt", "  \n").await,
        Err(ChatError::EmptyPrompt)
    ));
}

#[tokio::test]
async fn streamed_fragments_match_raw_output() {
    let (_fixture, service) = service(ScriptedBackend::echo_reversed());

    let mut turn = service.generate_stream("stream me").await.unwrap();
    let fragments: Vec<String> = turn.fragments().collect().await;
    let outcome = turn.finish().await.unwrap();

    assert_eq!(fragments.concat(), outcome.raw);
    assert_eq!(outcome.raw, "Assistant: em maerts");
    assert_eq!(outcome.text, "em maerts");
}

#[tokio::test]
async fn cancel_stops_streaming_turn() {
    let backend = ScriptedBackend::fixed("an answer that takes its time").with_token_delay(Duration::from_millis(10));
    let (_fixture, service) = service(backend);

    assert!(!service.cancel());
    let mut turn = service.generate_stream("go").await.unwrap();
    turn.next_fragment().await.unwrap();
    assert!(service.cancel());

    let outcome = turn.finish().await.unwrap();
    assert_eq!(outcome.finish_reason, FinishReason::Cancelled);
    assert_eq!(service.history().len(), 2);
}

#[tokio::test]
async fn abandoned_generate_is_cancelled() {
    let reply = "a long answer nobody waits for";
    let backend = ScriptedBackend::fixed(reply).with_token_delay(Duration::from_millis(20));
    let (fixture, service) = service(backend);

    let gave_up = tokio::time::timeout(Duration::from_millis(100), service.generate("hi")).await;
    assert!(gave_up.is_err());

    // The next call waits out the cancelled turn instead of reporting busy
    assert_eq!(service.generate("next").await.unwrap(), reply);

    let history = service.history();
    assert_eq!(history.len(), 4);
    assert!(history[1].text.len() < reply.len());
    assert!(fixture.probe.tokens_sampled() < 2 * reply.len());
}

#[tokio::test]
async fn shutdown_closes_the_session() {
    let (_fixture, service) = service(ScriptedBackend::echo_reversed());
    service.generate("hello").await.unwrap();

    service.shutdown();
    assert!(matches!(service.generate("again").await, Err(ChatError::SessionClosed)));
    assert_eq!(
        service.respond("again").await,
        GenerationResult::Error { error: ErrorKind::SessionClosed }
    );
}

#[tokio::test]
async fn shutdown_before_first_use() {
    let (fixture, service) = service(ScriptedBackend::echo_reversed());
    service.shutdown();
    assert!(matches!(service.generate("hello").await, Err(ChatError::SessionClosed)));
    assert_eq!(fixture.probe.evaluators_created(), 0);
}
