//! Tolerant decoding of model output.
//!
//! Models wrap JSON in code fences, prepend chatter, or leave trailing
//! commas. [`parse`] tries progressively more forgiving strategies and only
//! fails once all of them have.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::{QpaError, Result};

#[allow(clippy::expect_used)]
static FENCE_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^```[A-Za-z0-9_-]*[ \t]*\r?\n?").expect("static regex"));

#[allow(clippy::expect_used)]
static FENCE_CLOSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\r?\n?```\s*$").expect("static regex"));

/// Decodes model output into a JSON value.
///
/// Strategies, in order: direct decode, code-fence stripping, then each
/// balanced `{...}`/`[...]` span as written and with trailing commas
/// removed. Spans are tried left to right, so braces in leading prose do not
/// hide a valid object further on.
///
/// # Errors
///
/// Returns `QpaError::ResponseNotParseable` if every strategy fails.
pub fn parse(raw: &str) -> Result<Value> {
    let trimmed = raw.trim();
    let direct = match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    let unfenced = strip_fences(trimmed);
    if unfenced.len() != trimmed.len() {
        if let Ok(value) = serde_json::from_str::<Value>(unfenced) {
            debug!("Decoded model output after stripping code fences");
            return Ok(value);
        }
    }

    let mut span_error = None;
    let mut from = 0;
    while let Some((start, end)) = balanced_span(unfenced, from) {
        let span = &unfenced[start..end];
        match serde_json::from_str::<Value>(span) {
            Ok(value) => {
                debug!("Decoded model output from embedded JSON span");
                return Ok(value);
            }
            Err(e) => {
                if let Ok(value) = serde_json::from_str::<Value>(&strip_trailing_commas(span)) {
                    debug!("Decoded model output after removing trailing commas");
                    return Ok(value);
                }
                span_error.get_or_insert(e);
            }
        }
        from = start + 1;
    }

    let reason = span_error.unwrap_or(direct).to_string();
    Err(QpaError::not_parseable(reason, raw))
}

/// Decodes model output into `T`.
///
/// # Errors
///
/// Returns `QpaError::ResponseNotParseable` if no JSON could be recovered and
/// `QpaError::ResponseShapeMismatch` if the JSON does not fit `T`.
pub fn parse_as<T: DeserializeOwned>(raw: &str, expected: &str) -> Result<T> {
    let value = parse(raw)?;
    serde_json::from_value(value).map_err(|e| QpaError::shape_mismatch(expected, e.to_string()))
}

fn strip_fences(text: &str) -> &str {
    let start = FENCE_OPEN.find(text).map_or(0, |m| m.end());
    let body = &text[start..];
    let end = FENCE_CLOSE.find(body).map_or(body.len(), |m| m.start());
    body[..end].trim()
}

/// Tracks whether a byte scan is inside a JSON string literal.
#[derive(Debug, Default)]
struct StringState {
    in_string: bool,
    escaped: bool,
}

impl StringState {
    /// Feeds one byte and reports whether it belongs to a string literal,
    /// quotes included.
    fn step(&mut self, byte: u8) -> bool {
        if self.in_string {
            match byte {
                _ if self.escaped => self.escaped = false,
                b'\\' => self.escaped = true,
                b'"' => self.in_string = false,
                _ => {}
            }
            return true;
        }
        if byte == b'"' {
            self.in_string = true;
            return true;
        }
        false
    }
}

/// Finds the first balanced object or array opening at or after `from`,
/// skipping brackets inside string literals. Returns its byte range.
fn balanced_span(text: &str, from: usize) -> Option<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut search = from;
    loop {
        let start = search + text.get(search..)?.find(['{', '['])?;
        let mut stack: Vec<u8> = Vec::new();
        let mut strings = StringState::default();
        let mut mismatched = false;

        for (offset, byte) in bytes[start..].iter().copied().enumerate() {
            if strings.step(byte) {
                continue;
            }
            match byte {
                b'{' => stack.push(b'}'),
                b'[' => stack.push(b']'),
                b'}' | b']' => {
                    if stack.pop() != Some(byte) {
                        mismatched = true;
                        break;
                    }
                    if stack.is_empty() {
                        return Some((start, start + offset + 1));
                    }
                }
                _ => {}
            }
        }
        if !mismatched {
            return None;
        }
        search = start + 1;
    }
}

/// Drops commas that directly precede a closing bracket, leaving string
/// literals untouched.
fn strip_trailing_commas(span: &str) -> String {
    let bytes = span.as_bytes();
    let mut out = String::with_capacity(span.len());
    let mut strings = StringState::default();
    let mut copied = 0;

    for (i, byte) in bytes.iter().copied().enumerate() {
        if strings.step(byte) || byte != b',' {
            continue;
        }
        let closes = bytes[i + 1..]
            .iter()
            .find(|b| !b.is_ascii_whitespace())
            .is_some_and(|b| matches!(b, b'}' | b']'));
        if closes {
            out.push_str(&span[copied..i]);
            copied = i + 1;
        }
    }
    out.push_str(&span[copied..]);
    out
}
