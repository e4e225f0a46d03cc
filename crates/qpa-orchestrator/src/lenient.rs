//! Tolerant field decoders for model-produced JSON.
//!
//! Models drift between `"5"` and `5`, between a list of strings and a list of
//! objects, and between `null` and a missing key. These helpers are used with
//! `#[serde(deserialize_with = ...)]` so that drift of that kind is absorbed at
//! the boundary while genuinely wrong shapes (an object where a section list is
//! expected) still fail.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Renders a scalar or compound value as display text.
pub(crate) fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .map(value_to_text)
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(map) => {
            if let (Some(assertion), Some(reason)) = (map.get("assertion"), map.get("reason")) {
                return format!(
                    "Assertion: {}\nReason: {}",
                    value_to_text(assertion),
                    value_to_text(reason)
                );
            }
            if let Some(headers) = map.get("headers") {
                return table_to_text(headers, map.get("rows"));
            }
            if let (Some(label), Some(text)) = (map.get("label"), map.get("text")) {
                return format!("{}) {}", value_to_text(label), value_to_text(text));
            }
            for key in ["text", "description", "content"] {
                if let Some(inner) = map.get(key) {
                    return value_to_text(inner);
                }
            }
            value.to_string()
        }
    }
}

fn table_to_text(headers: &Value, rows: Option<&Value>) -> String {
    let mut out = format!("Headers: {}", value_to_text(headers));
    if let Some(Value::Array(rows)) = rows {
        if !rows.is_empty() {
            let rendered: Vec<String> = rows.iter().map(value_to_text).collect();
            out.push_str("\nRows: ");
            out.push_str(&rendered.join("; "));
        }
    }
    out
}

/// Reads a leading number out of values such as `5`, `"5"`, `"2.5 marks"`.
pub(crate) fn value_to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let numeric: String = s
                .trim()
                .chars()
                .take_while(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            numeric.parse().ok()
        }
        _ => None,
    }
}

/// Any value as a string; `null` becomes empty.
pub(crate) fn string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value_to_text(&value))
}

/// Any value as an optional string; `null` and blank text become `None`.
pub(crate) fn opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let text = value_to_text(&value);
    Ok((!text.trim().is_empty()).then_some(text))
}

/// A marks value; anything unreadable counts as zero.
pub(crate) fn marks<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value_to_number(&value).unwrap_or(0.0).max(0.0))
}

/// An optional number.
pub(crate) fn opt_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value_to_number(&value))
}

/// A boolean that also accepts `"yes"`, `"true"` and `null`.
pub(crate) fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Bool(b) => b,
        Value::String(s) => matches!(s.trim().to_lowercase().as_str(), "true" | "yes" | "1"),
        Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        _ => false,
    })
}

/// A list of display strings; single values are wrapped, objects rendered.
pub(crate) fn string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items
            .iter()
            .map(value_to_text)
            .filter(|s| !s.trim().is_empty())
            .collect(),
        other => {
            let text = value_to_text(&other);
            if text.trim().is_empty() {
                Vec::new()
            } else {
                vec![text]
            }
        }
    })
}

/// A list whose `null` form means empty.
pub(crate) fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// A component-to-marks map, given either as an object or as a list of
/// `{component, marks}` entries.
pub(crate) fn mark_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let mut out = BTreeMap::new();
    match value {
        Value::Object(map) => {
            for (component, marks) in &map {
                if let Some(marks) = value_to_number(marks) {
                    out.insert(component.clone(), marks);
                }
            }
        }
        Value::Array(entries) => {
            for entry in &entries {
                let component = entry
                    .get("component")
                    .or_else(|| entry.get("name"))
                    .map(value_to_text);
                let marks = entry.get("marks").and_then(value_to_number);
                if let (Some(component), Some(marks)) = (component, marks) {
                    out.insert(component, marks);
                }
            }
        }
        _ => {}
    }
    Ok(out)
}

/// A nested value that falls back to its default when it does not decode.
pub(crate) fn or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}
