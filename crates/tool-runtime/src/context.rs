//! Caller-supplied query context.
//!
//! A query may carry a flat map of hints (current location, city, user
//! preferences, anything else). The recognized keys are rendered first, in a
//! fixed order, then every remaining key in insertion order.

use indexmap::IndexMap;
use serde_json::Value;

/// Flat key → scalar map supplied alongside a query.
pub type QueryContext = IndexMap<String, Value>;

const RECOGNIZED: [(&str, &str); 3] = [
    ("location", "Current location"),
    ("city", "City"),
    ("preferences", "Preferences"),
];

const SEPARATOR: &str = "; ";

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Flatten a context map into a one-line preamble. Returns `None` when
/// nothing renderable is present.
pub fn format_context(context: &QueryContext) -> Option<String> {
    let mut parts = Vec::new();

    for (key, label) in RECOGNIZED {
        if let Some(value) = context.get(key) {
            if !value.is_null() {
                parts.push(format!("{}: {}", label, render(value)));
            }
        }
    }

    for (key, value) in context {
        if RECOGNIZED.iter().any(|(k, _)| *k == key.as_str()) || value.is_null() {
            continue;
        }
        parts.push(format!("{}: {}", key, render(value)));
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(SEPARATOR))
    }
}

/// The first user message of a conversation.
pub fn build_user_message(query: &str, context: Option<&QueryContext>) -> String {
    match context.and_then(format_context) {
        Some(preamble) => format!("Context: {}\n\nUser query: {}", preamble, query),
        None => query.to_string(),
    }
}
