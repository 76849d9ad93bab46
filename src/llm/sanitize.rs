//! Cleanup of generated text.

use once_cell::sync::Lazy;
use regex::Regex;

static ROLE_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(user|system|assistant):").expect("role label pattern is valid")
});

const LABELS: [&str; 3] = ["user:", "system:", "assistant:"];

/// Strips every role label (any case) and trims the result.
///
/// Stripping repeats until nothing changes, so labels spliced together by
/// an earlier removal ("UsUser:er:") go too and the function is idempotent.
pub fn sanitize(text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let next = ROLE_LABEL.replace_all(&current, "");
        if next == current {
            break;
        }
        current = next.into_owned();
    }
    current.trim().to_string()
}

/// Incremental version of [`sanitize`] for display of streamed fragments.
///
/// Holds back text that could still become a label and drops leading
/// whitespace of the stream.
#[derive(Debug, Default)]
pub struct LabelFilter {
    pending: String,
    started: bool,
}

impl LabelFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: &str) -> String {
        self.pending.push_str(fragment);
        self.pending = strip_labels(&self.pending);

        let split = self.pending.len() - self.withheld();
        let ready: String = self.pending.drain(..split).collect();
        self.lead(ready)
    }

    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        self.lead(rest)
    }

    fn lead(&mut self, text: String) -> String {
        if self.started {
            return text;
        }
        let trimmed = text.trim_start();
        if !trimmed.is_empty() {
            self.started = true;
        }
        trimmed.to_string()
    }

    fn withheld(&self) -> usize {
        let bytes = self.pending.as_bytes();
        LABELS
            .iter()
            .filter_map(|label| {
                (1..label.len().min(bytes.len() + 1))
                    .rev()
                    .find(|&k| bytes[bytes.len() - k..].eq_ignore_ascii_case(&label.as_bytes()[..k]))
            })
            .max()
            .unwrap_or(0)
    }
}

fn strip_labels(text: &str) -> String {
    let mut current = text.to_string();
    while ROLE_LABEL.is_match(&current) {
        current = ROLE_LABEL.replace_all(&current, "").into_owned();
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_labels_case_insensitively() {
        assert_eq!(sanitize("Assistant: olleh"), "olleh");
        assert_eq!(sanitize("  USER: hi system:there "), "hi there");
        assert_eq!(sanitize("assistant:"), "");
    }

    #[test]
    fn idempotent_on_spliced_labels() {
        let once = sanitize("UsUser:er: hello");
        assert_eq!(once, "hello");
        assert_eq!(sanitize(&once), once);
    }

    #[test]
    fn leaves_plain_text_alone() {
        assert_eq!(sanitize("a user is: here"), "a user is: here");
    }

    #[test]
    fn filter_drops_streamed_label() {
        let mut filter = LabelFilter::new();
        let mut shown = String::new();
        for piece in ["Assi", "stant", ":", " ol", "leh"] {
            shown.push_str(&filter.push(piece));
        }
        shown.push_str(&filter.finish());
        assert_eq!(shown, "olleh");
    }

    #[test]
    fn filter_releases_false_alarm() {
        let mut filter = LabelFilter::new();
        assert_eq!(filter.push("Use"), "");
        assert_eq!(filter.push("ful"), "Useful");
    }
}
