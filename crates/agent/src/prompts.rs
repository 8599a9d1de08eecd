//! Named system-prompt templates.

use std::collections::HashMap;

use geoloop_tool_runtime::runtime::DEFAULT_SYSTEM_PROMPT;
use tracing::{info, warn};

pub const DEFAULT_TEMPLATE: &str = "default";
pub const ADDRESS_NORMALIZER_TEMPLATE: &str = "address-normalizer";

/// Enriches one JSON record with a standardized address and coordinates.
pub const ADDRESS_NORMALIZER_PROMPT: &str = r#"You are a geolocation assistant with mapping tools. You will receive a single JSON object describing an event or venue.

1. Extract the address description from the object's location field (for example "举办地点" or "address").
2. Geocode it with the mapping tools, using any city given in the object as context. Obtain the normalized address (province, city, district, street, number or landmark) and its latitude and longitude.
3. Format the normalized address as "city-district-main landmark or road-specific number or position", for example "长沙市-岳麓区-橘子洲景区-橘子洲头". When a level is unknown, use "无具体信息" for it.
4. Return the original object with every original field unchanged, plus three new fields:
   - "standardized_address": the string from step 3
   - "latitude": the latitude as a number
   - "longitude": the longitude as a number
5. If the location cannot be resolved, set "standardized_address" to "无法定位" and both coordinates to null.

Reply with the resulting JSON object only.

Example input:
{"市集名称": "很有艺术市集@梅溪湖艺术博物馆", "举办地点": "梅溪湖艺术博物馆1F", "开始时间": "2025-05-01", "结束时间": "2025-05-05"}

Example output:
{"市集名称": "很有艺术市集@梅溪湖艺术博物馆", "举办地点": "梅溪湖艺术博物馆1F", "开始时间": "2025-05-01", "结束时间": "2025-05-05", "standardized_address": "长沙市-岳麓区-梅溪湖国际文化艺术中心-大剧院1楼", "latitude": 28.1885, "longitude": 112.8992}

Process the following JSON object:"#;

#[derive(Debug, Clone)]
pub struct PromptManager {
    templates: HashMap<String, String>,
}

impl Default for PromptManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptManager {
    pub fn new() -> Self {
        let mut templates = HashMap::new();
        templates.insert(DEFAULT_TEMPLATE.to_string(), DEFAULT_SYSTEM_PROMPT.to_string());
        templates.insert(
            ADDRESS_NORMALIZER_TEMPLATE.to_string(),
            ADDRESS_NORMALIZER_PROMPT.to_string(),
        );
        Self { templates }
    }

    /// Template by name; unknown names fall back to `default`.
    pub fn get(&self, name: &str) -> &str {
        if let Some(prompt) = self.templates.get(name) {
            return prompt;
        }
        warn!(template = name, "Unknown prompt template, using default");
        self.templates
            .get(DEFAULT_TEMPLATE)
            .map(String::as_str)
            .unwrap_or(DEFAULT_SYSTEM_PROMPT)
    }

    pub fn register_template(&mut self, name: impl Into<String>, prompt: impl Into<String>) {
        let name = name.into();
        info!(template = %name, "Registered prompt template");
        self.templates.insert(name, prompt.into());
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.templates.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_templates() {
        let prompts = PromptManager::new();
        assert_eq!(prompts.get(DEFAULT_TEMPLATE), DEFAULT_SYSTEM_PROMPT);
        assert!(prompts.get(ADDRESS_NORMALIZER_TEMPLATE).contains("standardized_address"));
        assert_eq!(prompts.names(), vec![ADDRESS_NORMALIZER_TEMPLATE, DEFAULT_TEMPLATE]);
    }

    #[test]
    fn test_unknown_template_falls_back() {
        let prompts = PromptManager::new();
        assert_eq!(prompts.get("no-such-template"), DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn test_register_overrides() {
        let mut prompts = PromptManager::new();
        prompts.register_template("poi", "Find points of interest.");
        prompts.register_template(DEFAULT_TEMPLATE, "Be brief.");
        assert_eq!(prompts.get("poi"), "Find points of interest.");
        assert_eq!(prompts.get("missing"), "Be brief.");
    }
}
