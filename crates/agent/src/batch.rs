//! Batch enrichment of JSON records through the address-normalizer prompt.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::prompts::ADDRESS_NORMALIZER_TEMPLATE;
use crate::session::GeoSession;

/// Fields an enriched record must carry.
pub const REQUIRED_FIELDS: [&str; 3] = ["standardized_address", "latitude", "longitude"];

/// First balanced `{...}` in `text` that parses as an object carrying
/// every [`REQUIRED_FIELDS`] key. Braces inside JSON strings are ignored.
pub fn extract_valid_json(text: &str) -> Option<Map<String, Value>> {
    let bytes = text.as_bytes();
    let mut search_from = 0;
    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        if let Some(end) = matching_brace(bytes, start) {
            if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(&text[start..=end]) {
                if REQUIRED_FIELDS.iter().all(|f| obj.contains_key(*f)) {
                    return Some(obj);
                }
            }
        }
        search_from = start + 1;
    }
    None
}

/// Index of the brace closing the one at `start`.
fn matching_brace(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub enriched: usize,
}

pub struct BatchProcessor {
    session: Arc<GeoSession>,
    batch_size: usize,
    template: String,
}

impl BatchProcessor {
    pub fn new(session: Arc<GeoSession>) -> Self {
        Self {
            session,
            batch_size: 1,
            template: ADDRESS_NORMALIZER_TEMPLATE.to_string(),
        }
    }

    /// Items processed concurrently per chunk. Zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    /// Enriched record, or the original item when the query fails or the
    /// answer carries no usable object.
    pub async fn process_item(&self, item: &Value) -> Value {
        let query = item.to_string();
        let result = match self
            .session
            .process_with_template(&query, None, &self.template)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Batch item failed, keeping original");
                return item.clone();
            }
        };
        if !result.success {
            warn!(error = ?result.error, "Batch item unanswered, keeping original");
            return item.clone();
        }
        match extract_valid_json(&result.final_answer) {
            Some(obj) => {
                debug!(request_id = ?result.request_id, "Extracted enriched record");
                Value::Object(obj)
            }
            None => {
                warn!(request_id = ?result.request_id, "No enriched record in answer, keeping original");
                item.clone()
            }
        }
    }

    /// Process every item, `batch_size` at a time. Output order matches input.
    pub async fn process_batch(&self, items: &[Value]) -> (Vec<Value>, BatchSummary) {
        info!(items = items.len(), batch_size = self.batch_size, "Starting batch");
        let mut out = Vec::with_capacity(items.len());
        for chunk in items.chunks(self.batch_size) {
            let processed = join_all(chunk.iter().map(|item| self.process_item(item))).await;
            out.extend(processed);
            info!("Processed {}/{} items", out.len(), items.len());
        }
        let enriched = out
            .iter()
            .filter(|v| REQUIRED_FIELDS.iter().all(|f| v.get(*f).is_some()))
            .count();
        let summary = BatchSummary {
            total: items.len(),
            enriched,
        };
        (out, summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_from_surrounding_prose() {
        let text = r#"Here is the result:
{"举办地点": "梅溪湖艺术博物馆1F", "standardized_address": "长沙市-岳麓区-梅溪湖国际文化艺术中心-大剧院1楼", "latitude": 28.1885, "longitude": 112.8992}
Let me know if you need more."#;
        let obj = extract_valid_json(text).unwrap();
        assert_eq!(obj["latitude"], json!(28.1885));
        assert_eq!(obj["举办地点"], "梅溪湖艺术博物馆1F");
    }

    #[test]
    fn test_skips_objects_missing_fields() {
        let text = r#"{"note": "thinking"} then {"standardized_address": "无法定位", "latitude": null, "longitude": null}"#;
        let obj = extract_valid_json(text).unwrap();
        assert_eq!(obj["standardized_address"], "无法定位");
        assert!(obj["latitude"].is_null());
    }

    #[test]
    fn test_nested_object_found_inside_wrapper() {
        let text = r#"{"result": {"standardized_address": "a", "latitude": 1.0, "longitude": 2.0}}"#;
        // outer object lacks the fields, inner one is found on a later scan
        let obj = extract_valid_json(text).unwrap();
        assert_eq!(obj["standardized_address"], "a");
    }

    #[test]
    fn test_braces_inside_strings() {
        let text = r#"{"standardized_address": "x}{y", "latitude": 1, "longitude": 2}"#;
        assert!(extract_valid_json(text).is_some());
    }

    #[test]
    fn test_nothing_usable() {
        assert!(extract_valid_json("no json here").is_none());
        assert!(extract_valid_json("{unbalanced").is_none());
        assert!(extract_valid_json(r#"{"latitude": 1}"#).is_none());
    }
}
