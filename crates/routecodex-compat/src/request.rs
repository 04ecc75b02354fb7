use serde_json::Value;
use tracing::warn;

use routecodex_transform::{get_path_first, remove_path};

use crate::config::CompatProfile;

/// Apply request-side quirks. The original payload is returned whenever a
/// rule misbehaves.
pub fn sanitize_request(profile: &CompatProfile, payload: Value) -> Value {
    let Some(blacklist) = &profile.request_blacklist else {
        return payload;
    };

    let mut sanitized = payload.clone();

    for key in &blacklist.function_keys {
        if key.trim().is_empty() || key.contains('.') {
            warn!(profile = %profile.name, key, "ignoring malformed function blacklist key");
            return payload;
        }
        remove_path(&mut sanitized, &format!("tools[].function.{key}"));
        remove_path(
            &mut sanitized,
            &format!("messages[].tool_calls[].function.{key}"),
        );
    }

    for removal in &blacklist.conditional_removals {
        if is_empty_or_absent(get_path_first(&sanitized, &removal.when_empty)) {
            remove_path(&mut sanitized, &removal.path);
        }
    }

    sanitized
}

fn is_empty_or_absent(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
        Some(Value::String(text)) => text.is_empty(),
        Some(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn glm_strips_function_extensions() {
        let payload = json!({
            "tools": [{"type": "function", "function": {"name": "calc", "strict": true, "json_schema": {}}}],
            "messages": [{
                "role": "assistant",
                "tool_calls": [{"function": {"name": "calc", "arguments": "{}", "strict": false}}],
            }],
        });
        let out = sanitize_request(&CompatProfile::glm(), payload);
        assert_eq!(out["tools"][0]["function"], json!({"name": "calc"}));
        assert!(out["messages"][0]["tool_calls"][0]["function"].get("strict").is_none());
        assert_eq!(out["messages"][0]["tool_calls"][0]["function"]["name"], "calc");
    }

    #[test]
    fn tool_choice_dropped_when_tools_absent() {
        let out = sanitize_request(
            &CompatProfile::glm(),
            json!({"tool_choice": "auto", "messages": []}),
        );
        assert!(out.get("tool_choice").is_none());
    }

    #[test]
    fn tool_choice_dropped_when_tools_empty() {
        let out = sanitize_request(
            &CompatProfile::glm(),
            json!({"tool_choice": "auto", "tools": [], "messages": []}),
        );
        assert!(out.get("tool_choice").is_none());
    }

    #[test]
    fn tool_choice_kept_when_tools_present() {
        let payload = json!({
            "tool_choice": "auto",
            "tools": [{"type": "function", "function": {"name": "calc"}}],
        });
        let out = sanitize_request(&CompatProfile::glm(), payload);
        assert_eq!(out["tool_choice"], "auto");
    }

    #[test]
    fn malformed_key_returns_original() {
        let mut profile = CompatProfile::glm();
        profile.request_blacklist.as_mut().unwrap().function_keys =
            vec!["nested.key".to_string()];
        let payload = json!({"tools": [{"function": {"name": "calc", "nested": {"key": 1}}}]});
        let out = sanitize_request(&profile, payload.clone());
        assert_eq!(out, payload);
    }

    #[test]
    fn passthrough_profile_is_identity() {
        let payload = json!({"tool_choice": "auto", "anything": [1, 2, 3]});
        let out = sanitize_request(&CompatProfile::passthrough("openai"), payload.clone());
        assert_eq!(out, payload);
    }
}
