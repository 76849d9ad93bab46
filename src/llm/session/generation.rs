use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use encoding_rs::{Decoder, UTF_8};
use tracing::debug;

use crate::error::ChatError;
use crate::llm::backend::Token;
use super::context::InferenceContext;
use super::types::{FinishReason, GenerationRequest};

/// Text produced by one run of the generation loop.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    /// Output up to, not including, the stop sequence
    pub raw: String,
    pub finish: FinishReason,
    pub generated: usize,
}

/// Result of feeding one piece to a [`StopScanner`]
#[derive(Debug, Default, PartialEq)]
pub struct ScanStep {
    /// Text that can no longer turn out to be part of a stop sequence
    pub emit: String,
    pub stopped: bool,
}

/// Finds stop sequences in streamed text.
///
/// Text that might still grow into a stop sequence is withheld until the
/// following pieces rule it in or out, so a consumer never sees part of one.
#[derive(Debug)]
pub struct StopScanner {
    stops: Vec<String>,
    raw: String,
    emitted: usize,
}

impl StopScanner {
    pub fn new(stops: &[String]) -> Self {
        Self {
            stops: stops.iter().filter(|s| !s.is_empty()).cloned().collect(),
            raw: String::new(),
            emitted: 0,
        }
    }

    pub fn push(&mut self, piece: &str) -> ScanStep {
        self.raw.push_str(piece);

        // Withholding guarantees no stop sequence starts before `emitted`
        let unseen = &self.raw[self.emitted..];
        let hit = self.stops
            .iter()
            .filter_map(|stop| unseen.find(stop.as_str()))
            .min();

        if let Some(offset) = hit {
            let end = self.emitted + offset;
            let emit = self.raw[self.emitted..end].to_string();
            self.raw.truncate(end);
            self.emitted = end;
            return ScanStep { emit, stopped: true };
        }

        let end = self.raw.len() - self.withheld();
        let emit = self.raw[self.emitted..end].to_string();
        self.emitted = end;
        ScanStep { emit, stopped: false }
    }

    /// Releases whatever was withheld
    pub fn flush(&mut self) -> String {
        let rest = self.raw[self.emitted..].to_string();
        self.emitted = self.raw.len();
        rest
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn into_raw(self) -> String {
        self.raw
    }

    /// Length of the longest unemitted suffix that is a proper prefix of a stop sequence
    fn withheld(&self) -> usize {
        let pending = &self.raw[self.emitted..];
        self.stops
            .iter()
            .filter_map(|stop| {
                (1..stop.len().min(pending.len() + 1))
                    .rev()
                    .find(|&k| {
                        let start = pending.len() - k;
                        pending.is_char_boundary(start)
                            && stop.is_char_boundary(k)
                            && pending[start..] == stop[..k]
                    })
            })
            .max()
            .unwrap_or(0)
    }
}

/// Turns token bytes into text. Incomplete UTF-8 sequences are held back
/// until the bytes completing them arrive.
struct PieceDecoder {
    decoder: Decoder,
}

impl PieceDecoder {
    fn new() -> Self {
        Self { decoder: UTF_8.new_decoder() }
    }

    fn decode(&mut self, bytes: &[u8], last: bool) -> String {
        let capacity = self
            .decoder
            .max_utf8_buffer_length(bytes.len())
            .unwrap_or(bytes.len() * 3 + 4);
        let mut text = String::with_capacity(capacity);
        let _ = self.decoder.decode_to_string(bytes, &mut text, last);
        text
    }

    /// Bytes left dangling at the end come out as U+FFFD
    fn finish(&mut self) -> String {
        self.decode(&[], true)
    }
}

/// Runs the sample/append/feed-back loop for one turn.
///
/// The prompt is loaded into `context` first. Each step checks `cancel`,
/// then the token budget, then samples. Fragments go to `on_fragment` in
/// order; their concatenation equals the returned raw text.
pub fn drive<F>(
    context: &mut InferenceContext,
    prompt: &[Token],
    request: &GenerationRequest,
    cancel: &AtomicBool,
    mut on_fragment: F,
) -> Result<Generation, ChatError>
where
    F: FnMut(&str),
{
    let model = Arc::clone(context.model());
    let fed = context.load_prompt(prompt)?;
    debug!(prompt_tokens = prompt.len(), fed, max_tokens = request.max_tokens, "Generating");

    let eos = model.eos();
    let mut scanner = StopScanner::new(&request.stop_sequences);
    let mut pieces = PieceDecoder::new();
    let mut generated = 0;

    let mut finish = loop {
        if cancel.load(Ordering::SeqCst) {
            break FinishReason::Cancelled;
        }
        if generated >= request.max_tokens {
            break FinishReason::MaxTokens;
        }

        let token = context.next_token(&request.sampling)?;
        if token == eos {
            break FinishReason::EndOfSequence;
        }
        generated += 1;

        let piece = pieces.decode(&model.token_bytes(token), false);
        if piece.is_empty() {
            continue;
        }
        let step = scanner.push(&piece);
        if !step.emit.is_empty() {
            on_fragment(&step.emit);
        }
        if step.stopped {
            break FinishReason::StopSequence;
        }
    };

    if finish != FinishReason::StopSequence {
        let tail = pieces.finish();
        if !tail.is_empty() {
            let step = scanner.push(&tail);
            if !step.emit.is_empty() {
                on_fragment(&step.emit);
            }
            if step.stopped {
                finish = FinishReason::StopSequence;
            }
        }
    }

    if finish != FinishReason::StopSequence {
        let rest = scanner.flush();
        if !rest.is_empty() {
            on_fragment(&rest);
        }
    }

    debug!(generated, ?finish, "Generation finished");
    Ok(Generation {
        raw: scanner.into_raw(),
        finish,
        generated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::backend::{ModelBackend, ScriptedBackend};
    use crate::llm::model::ModelHandle;

    fn scanner(stops: &[&str]) -> StopScanner {
        let stops: Vec<String> = stops.iter().map(|s| s.to_string()).collect();
        StopScanner::new(&stops)
    }

    #[test]
    fn withholds_possible_stop_prefix() {
        let mut s = scanner(&["User:"]);
        assert_eq!(s.push("hello Us").emit, "hello ");
        let step = s.push("ually");
        assert_eq!(step.emit, "Usually");
        assert!(!step.stopped);
    }

    #[test]
    fn stop_split_across_pieces() {
        let mut s = scanner(&["User:"]);
        assert_eq!(s.push("answer U").emit, "answer ");
        let step = s.push("ser: tail");
        assert!(step.stopped);
        assert_eq!(step.emit, "");
        assert_eq!(s.raw(), "answer ");
    }

    #[test]
    fn earliest_stop_wins() {
        let mut s = scanner(&["User:", "\n\n"]);
        let step = s.push("a\n\nUser:");
        assert!(step.stopped);
        assert_eq!(step.emit, "a");
    }

    #[test]
    fn multibyte_text_is_not_split() {
        let mut s = scanner(&["é!"]);
        assert_eq!(s.push("caf").emit, "caf");
        assert_eq!(s.push("é").emit, "");
        assert_eq!(s.flush(), "é");
    }

    #[test]
    fn empty_stops_are_ignored() {
        let mut s = scanner(&[""]);
        let step = s.push("text");
        assert_eq!(step.emit, "text");
        assert!(!step.stopped);
    }

    fn run(reply: &str, request: &GenerationRequest) -> (Generation, Vec<String>) {
        run_with(ScriptedBackend::fixed(reply), request)
    }

    fn run_with(backend: ScriptedBackend, request: &GenerationRequest) -> (Generation, Vec<String>) {
        let backend: Arc<dyn ModelBackend> = Arc::new(backend);
        let model = Arc::new(ModelHandle::with_backend(backend, 256));
        let mut context = model.create_context().unwrap();
        let prompt = model.tokenize("User: hi\nAssistant:").unwrap();
        let mut fragments = Vec::new();
        let generation = drive(&mut context, &prompt, request, &AtomicBool::new(false), |f| {
            fragments.push(f.to_string())
        })
        .unwrap();
        (generation, fragments)
    }

    #[test]
    fn halts_at_stop_sequence() {
        let request = GenerationRequest {
            max_tokens: 50,
            ..GenerationRequest::default()
        };
        let (generation, fragments) = run("answer User: ignored tail", &request);
        assert_eq!(generation.finish, FinishReason::StopSequence);
        assert_eq!(generation.raw, "answer ");
        assert_eq!(generation.generated, "answer User:".len());
        assert_eq!(fragments.concat(), "answer ");
    }

    #[test]
    fn respects_token_budget() {
        let request = GenerationRequest {
            max_tokens: 3,
            ..GenerationRequest::default()
        };
        let (generation, fragments) = run("abcdef", &request);
        assert_eq!(generation.finish, FinishReason::MaxTokens);
        assert_eq!(generation.raw, "abc");
        assert_eq!(fragments.concat(), "abc");
    }

    #[test]
    fn ends_on_eos() {
        let (generation, _) = run("ok", &GenerationRequest::default());
        assert_eq!(generation.finish, FinishReason::EndOfSequence);
        assert_eq!(generation.raw, "ok");
        assert_eq!(generation.generated, 2);
    }

    #[test]
    fn byte_tokens_decode_to_whole_characters() {
        let backend = ScriptedBackend::fixed("привет, мир").with_byte_tokens();
        let (generation, fragments) = run_with(backend, &GenerationRequest::default());
        assert_eq!(generation.raw, "привет, мир");
        assert_eq!(generation.generated, "привет, мир".len());
        assert!(fragments.iter().all(|f| !f.contains('\u{FFFD}')));
        assert_eq!(fragments.concat(), "привет, мир");
    }

    #[test]
    fn dangling_bytes_become_replacement_character() {
        let request = GenerationRequest {
            max_tokens: 3,
            ..GenerationRequest::default()
        };
        let (generation, fragments) = run_with(ScriptedBackend::fixed("ая").with_byte_tokens(), &request);
        assert_eq!(generation.finish, FinishReason::MaxTokens);
        assert_eq!(generation.raw, "а\u{FFFD}");
        assert_eq!(fragments.concat(), generation.raw);
    }

    #[test]
    fn cancelled_before_first_token() {
        let backend: Arc<dyn ModelBackend> = Arc::new(ScriptedBackend::fixed("never"));
        let model = Arc::new(ModelHandle::with_backend(backend, 64));
        let mut context = model.create_context().unwrap();
        let prompt = model.tokenize("User: hi\nAssistant:").unwrap();
        let generation = drive(&mut context, &prompt, &GenerationRequest::default(), &AtomicBool::new(true), |_| {}).unwrap();
        assert_eq!(generation.finish, FinishReason::Cancelled);
        assert!(generation.raw.is_empty());
    }
}
