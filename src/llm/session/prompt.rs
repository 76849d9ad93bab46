//! Prompt rendering and the truncation policy.
//!
//! A conversation renders as one `"<Role>: <text>\n"` line per message,
//! followed by a bare `"Assistant:"` marker the model continues from. When
//! the result does not fit the token budget, the oldest message that is
//! neither a standing System instruction nor the latest message is dropped,
//! one at a time, until it does.

use tracing::warn;

use crate::error::ChatError;
use crate::llm::backend::{BackendError, Token};
use super::types::{Message, Role};

/// A rendered prompt that fits its budget
#[derive(Debug, Clone, PartialEq)]
pub struct FittedPrompt {
    pub text: String,
    pub tokens: Vec<Token>,
    /// Messages left out to make it fit
    pub dropped: usize,
}

fn render_line(message: &Message) -> String {
    format!("{}: {}\n", message.role.label(), message.text)
}

pub fn render<'a, I>(messages: I) -> String
where
    I: IntoIterator<Item = &'a Message>,
{
    let mut prompt: String = messages.into_iter().map(render_line).collect();
    prompt.push_str(Role::Assistant.label());
    prompt.push(':');
    prompt
}

/// Renders `history` into at most `budget` tokens.
///
/// Every message is tokenized once and dropping one subtracts its count.
/// The chosen prompt is then tokenized whole; if tokens merging across
/// line boundaries push it over, dropping continues from the exact count.
///
/// Fails with [`ChatError::PromptTooLarge`] when even the System messages
/// plus the latest message exceed the budget.
pub fn fit_to_budget<F>(history: &[Message], budget: usize, tokenize: F) -> Result<FittedPrompt, ChatError>
where
    F: Fn(&str) -> Result<Vec<Token>, BackendError>,
{
    // Tokens added to every call whatever the text, such as BOS
    let overhead = tokenize("")?.len();
    let count = |text: &str| -> Result<usize, ChatError> { Ok(tokenize(text)?.len().saturating_sub(overhead)) };

    let marker = format!("{}:", Role::Assistant.label());
    let mut included = history
        .iter()
        .map(|message| Ok((message, count(&render_line(message))?)))
        .collect::<Result<Vec<(&Message, usize)>, ChatError>>()?;
    let mut estimate = overhead + count(&marker)? + included.iter().map(|(_, n)| n).sum::<usize>();
    let mut dropped = 0;

    loop {
        if estimate <= budget {
            let text = render(included.iter().map(|(message, _)| *message));
            let tokens = tokenize(&text)?;
            if tokens.len() <= budget {
                if dropped > 0 {
                    warn!(dropped, tokens = tokens.len(), budget, "Truncated conversation to fit the context");
                }
                return Ok(FittedPrompt { text, tokens, dropped });
            }
            estimate = tokens.len();
        }

        let latest = included.len().saturating_sub(1);
        let oldest = included
            .iter()
            .take(latest)
            .position(|(message, _)| message.role != Role::System);
        match oldest {
            Some(index) => {
                let (_, tokens) = included.remove(index);
                estimate = estimate.saturating_sub(tokens);
                dropped += 1;
            }
            None => {
                let text = render(included.iter().map(|(message, _)| *message));
                return Err(ChatError::PromptTooLarge {
                    required: tokenize(&text)?.len(),
                    budget,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn chars(text: &str) -> Result<Vec<Token>, BackendError> {
        Ok(text.chars().map(|c| Token(c as i32)).collect())
    }

    fn conversation() -> Vec<Message> {
        vec![
            Message::system("sys"),
            Message::user("one"),
            Message::assistant("eno"),
            Message::user("two"),
        ]
    }

    #[test]
    fn renders_role_markers() {
        let text = render(&conversation());
        assert_eq!(text, "System: sys\nUser: one\nAssistant: eno\nUser: two\nAssistant:");
    }

    #[test]
    fn fits_without_dropping() {
        let fitted = fit_to_budget(&conversation(), 1000, chars).unwrap();
        assert_eq!(fitted.dropped, 0);
        assert_eq!(fitted.tokens.len(), fitted.text.chars().count());
    }

    #[test]
    fn drops_oldest_non_system_first() {
        // "System: sys\nUser: two\nAssistant:" is 32 chars
        let fitted = fit_to_budget(&conversation(), 32, chars).unwrap();
        assert_eq!(fitted.dropped, 2);
        assert_eq!(fitted.text, "System: sys\nUser: two\nAssistant:");

        let fitted = fit_to_budget(&conversation(), 47, chars).unwrap();
        assert_eq!(fitted.dropped, 1);
        assert!(fitted.text.starts_with("System: sys\nAssistant: eno\n"));
    }

    #[test]
    fn each_message_is_tokenized_once() {
        let calls = Cell::new(0);
        let counting = |text: &str| {
            calls.set(calls.get() + 1);
            chars(text)
        };
        let mut history = conversation();
        for i in 0..20 {
            history.push(Message::assistant(format!("reply {}", i)));
            history.push(Message::user(format!("question {}", i)));
        }

        let fitted = fit_to_budget(&history, 60, counting).unwrap();
        assert!(fitted.dropped > 30);
        assert!(fitted.tokens.len() <= 60);
        // Overhead probe, marker, one per message and the final prompt
        assert_eq!(calls.get(), history.len() + 3);
    }

    #[test]
    fn per_call_overhead_is_counted_once() {
        // Every call prepends one BOS token
        let with_bos = |text: &str| -> Result<Vec<Token>, BackendError> {
            let mut tokens = vec![Token(0)];
            tokens.extend(chars(text)?);
            Ok(tokens)
        };
        let fitted = fit_to_budget(&conversation(), 33, with_bos).unwrap();
        assert_eq!(fitted.dropped, 2);
        assert_eq!(fitted.tokens.len(), 33);
    }

    #[test]
    fn latest_message_alone_too_large() {
        let err = fit_to_budget(&conversation(), 31, chars).unwrap_err();
        assert!(matches!(err, ChatError::PromptTooLarge { required: 32, budget: 31 }));
    }
}
