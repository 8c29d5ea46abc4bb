//! Content sanitization applied at the extension boundary
//!
//! This is a heuristic filter for markup and injection patterns. It does not
//! isolate extensions from the host.

use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde_json::Value;

static SCRIPT_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<\s*(script|style)\b[^>]*>.*?<\s*/\s*(script|style)\s*>").unwrap());

static DANGEROUS_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<\s*/?\s*(script|style|iframe|object|embed|form|meta|link|base)\b[^>]*>").unwrap()
});

static INLINE_HANDLER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\bon[a-z]+\s*=\s*("[^"]*"|'[^']*'|[^\s>]+)"#).unwrap());

static SCRIPT_URI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(javascript|vbscript)\s*:|data\s*:\s*text/html").unwrap());

static MASS_MENTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"@(everyone|here)\b").unwrap());

/// Strips markup abuse from free text crossing the extension boundary
#[derive(Debug, Clone)]
pub struct Sanitizer {
    max_length: usize,
}

impl Sanitizer {
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Clean `text` until another pass would change nothing.
    ///
    /// Removing an inner tag can splice an outer one together
    /// (`<scr<iframe>ipt>`), so a single pass is not enough.
    pub fn sanitize(&self, text: &str) -> String {
        let mut current = self.pass(text);
        loop {
            let next = self.pass(&current);
            if next == current {
                return current;
            }
            current = next;
        }
    }

    fn pass(&self, text: &str) -> String {
        let text: String = text
            .chars()
            .filter(|c| !c.is_control() || matches!(c, '\n' | '\t' | '\r'))
            .collect();
        let cleaned = SCRIPT_BLOCK.replace_all(&text, "");
        let cleaned = DANGEROUS_TAG.replace_all(&cleaned, "");
        let cleaned = INLINE_HANDLER.replace_all(&cleaned, "");
        let cleaned = SCRIPT_URI.replace_all(&cleaned, "");
        // zero-width space keeps the text readable but stops the ping
        let cleaned = MASS_MENTION.replace_all(&cleaned, "@\u{200B}$1");

        cleaned.chars().take(self.max_length).collect()
    }

    /// Sanitize every string inside a JSON value
    pub fn sanitize_value(&self, value: Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.sanitize(&s)),
            Value::Array(items) => {
                Value::Array(items.into_iter().map(|v| self.sanitize_value(v)).collect())
            }
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, self.sanitize_value(v)))
                    .collect(),
            ),
            other => other,
        }
    }
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new(2000)
    }
}
