use std::collections::BTreeMap;

/// Configurable `finish_reason` → Anthropic `stop_reason` table.
///
/// Unknown reasons fall through to `end_turn`. `content_filter` is mapped to
/// `end_turn` by default; deployments that want a distinct value override it.
#[derive(Debug, Clone)]
pub struct StopReasonTable {
    entries: BTreeMap<String, String>,
    fallback: String,
}

impl Default for StopReasonTable {
    fn default() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert("stop".to_string(), "end_turn".to_string());
        entries.insert("length".to_string(), "max_tokens".to_string());
        entries.insert("tool_calls".to_string(), "tool_use".to_string());
        entries.insert("function_call".to_string(), "tool_use".to_string());
        entries.insert("content_filter".to_string(), "end_turn".to_string());
        Self {
            entries,
            fallback: "end_turn".to_string(),
        }
    }
}

impl StopReasonTable {
    pub fn with_entry(mut self, finish_reason: &str, stop_reason: &str) -> Self {
        self.entries
            .insert(finish_reason.to_string(), stop_reason.to_string());
        self
    }

    pub fn stop_reason(&self, finish_reason: &str) -> &str {
        self.entries
            .get(finish_reason)
            .map(String::as_str)
            .unwrap_or(&self.fallback)
    }

    /// Reverse lookup for anthropic → openai conversions; first match wins.
    pub fn finish_reason(&self, stop_reason: &str) -> &str {
        self.entries
            .iter()
            .find(|(_, v)| v.as_str() == stop_reason)
            .map(|(k, _)| k.as_str())
            .unwrap_or("stop")
    }
}

/// Configurable usage field-name mapping between OpenAI and Anthropic shapes.
#[derive(Debug, Clone)]
pub struct UsageFieldMap {
    entries: Vec<(String, String)>,
}

impl Default for UsageFieldMap {
    fn default() -> Self {
        Self {
            entries: vec![
                ("prompt_tokens".to_string(), "input_tokens".to_string()),
                ("completion_tokens".to_string(), "output_tokens".to_string()),
                ("total_tokens".to_string(), "total_tokens".to_string()),
            ],
        }
    }
}

impl UsageFieldMap {
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn target_for(&self, source: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.as_str() == source)
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_finish_reason_defaults_to_end_turn() {
        let table = StopReasonTable::default();
        assert_eq!(table.stop_reason("stop"), "end_turn");
        assert_eq!(table.stop_reason("length"), "max_tokens");
        assert_eq!(table.stop_reason("tool_calls"), "tool_use");
        assert_eq!(table.stop_reason("banana"), "end_turn");
    }

    #[test]
    fn overrides_replace_defaults() {
        let table = StopReasonTable::default().with_entry("content_filter", "refusal");
        assert_eq!(table.stop_reason("content_filter"), "refusal");
    }

    #[test]
    fn usage_map_renames_prompt_tokens() {
        let map = UsageFieldMap::default();
        assert_eq!(map.target_for("prompt_tokens"), Some("input_tokens"));
        assert_eq!(map.target_for("completion_tokens"), Some("output_tokens"));
        assert_eq!(map.target_for("weird"), None);
    }
}
