use serde_json::Value;

/// OpenAI → OpenAI normalization pass. No shape change: unwraps accidental
/// `{data:{…}}` envelopes and strips internal `__*` carrier keys.
#[derive(Debug, Clone)]
pub struct NormalizeConfig {
    /// How many nested `data` envelopes to unwrap at most.
    pub max_unwrap_depth: usize,
    /// `__*` keys that survive the strip (e.g. the SSE carrier).
    pub preserve_keys: Vec<String>,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            max_unwrap_depth: 4,
            preserve_keys: vec!["__sse_responses".to_string()],
        }
    }
}

/// Idempotent: running the pass twice yields the same tree.
pub fn normalize_openai_payload(payload: Value, config: &NormalizeConfig) -> Value {
    let mut current = payload;
    for _ in 0..config.max_unwrap_depth {
        if looks_like_openai_payload(&current) {
            break;
        }
        let Some(inner) = current.get("data") else {
            break;
        };
        if !inner.is_object() {
            break;
        }
        current = inner.clone();
    }

    if let Value::Object(map) = &mut current {
        map.retain(|key, _| !key.starts_with("__") || config.preserve_keys.iter().any(|k| k == key));
    }
    current
}

fn looks_like_openai_payload(value: &Value) -> bool {
    let Value::Object(map) = value else {
        return false;
    };
    map.contains_key("choices") || map.contains_key("id") || map.contains_key("object")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unwraps_nested_data_envelopes() {
        let config = NormalizeConfig::default();
        let payload = json!({"data": {"data": {"choices": [], "id": "c1"}}});
        let out = normalize_openai_payload(payload, &config);
        assert_eq!(out, json!({"choices": [], "id": "c1"}));
    }

    #[test]
    fn stops_at_first_recognizable_shape() {
        let config = NormalizeConfig::default();
        // The outer object already looks like a completion; the inner `data`
        // field is user payload and must survive.
        let payload = json!({"id": "c1", "data": {"choices": []}});
        let out = normalize_openai_payload(payload.clone(), &config);
        assert_eq!(out, payload);
    }

    #[test]
    fn unwrap_depth_is_bounded() {
        let config = NormalizeConfig::default();
        let payload = json!({"data": {"data": {"data": {"data": {"data": {"nothing": true}}}}}});
        let out = normalize_openai_payload(payload, &config);
        // Four levels unwrapped, fifth left in place.
        assert_eq!(out, json!({"data": {"nothing": true}}));
    }

    #[test]
    fn strips_internal_keys_but_preserves_carrier() {
        let config = NormalizeConfig::default();
        let payload = json!({
            "id": "c1",
            "__route_hint": "default",
            "__sse_responses": true,
        });
        let out = normalize_openai_payload(payload, &config);
        assert_eq!(out, json!({"id": "c1", "__sse_responses": true}));
    }

    #[test]
    fn normalization_is_idempotent() {
        let config = NormalizeConfig::default();
        let payload = json!({"data": {"choices": [], "id": "c1", "__temp": 1}});
        let once = normalize_openai_payload(payload, &config);
        let twice = normalize_openai_payload(once.clone(), &config);
        assert_eq!(once, twice);
    }
}
