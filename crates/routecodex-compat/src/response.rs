use serde_json::Value;
use tracing::warn;

use routecodex_transform::remove_path;

use crate::config::CompatProfile;

/// Apply response-side deletions (non-stream payloads only). Paths covered
/// by the critical allow-list are never stripped.
pub fn sanitize_response(profile: &CompatProfile, payload: Value) -> Value {
    let Some(blacklist) = &profile.response_blacklist else {
        return payload;
    };

    let mut sanitized = payload;
    for path in &blacklist.paths {
        if path.trim().is_empty() {
            continue;
        }
        if let Some(critical) = shielding_critical_path(path, &blacklist.critical_paths) {
            warn!(
                profile = %profile.name,
                path,
                critical,
                "response blacklist path shielded by critical allow-list"
            );
            continue;
        }
        remove_path(&mut sanitized, path);
    }
    sanitized
}

/// A configured deletion is blocked when it would take a critical path with
/// it: exact match, or the critical path lives underneath the deleted one.
fn shielding_critical_path<'a>(path: &str, critical_paths: &'a [String]) -> Option<&'a str> {
    critical_paths
        .iter()
        .map(String::as_str)
        .find(|critical| critical == &path || is_parent_path(path, critical))
}

fn is_parent_path(parent: &str, child: &str) -> bool {
    child
        .strip_prefix(parent)
        .is_some_and(|rest| rest.starts_with('.') || rest.starts_with("[]"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResponseBlacklist;
    use serde_json::json;

    fn profile_with_paths(paths: &[&str]) -> CompatProfile {
        let mut profile = CompatProfile::passthrough("test");
        profile.response_blacklist = Some(ResponseBlacklist {
            paths: paths.iter().map(|p| p.to_string()).collect(),
            ..ResponseBlacklist::default()
        });
        profile
    }

    #[test]
    fn configured_paths_are_deleted() {
        let profile = profile_with_paths(&["system_fingerprint", "choices[].logprobs"]);
        let payload = json!({
            "system_fingerprint": "fp",
            "choices": [{"logprobs": null, "message": {"content": "x"}}],
        });
        let out = sanitize_response(&profile, payload);
        assert!(out.get("system_fingerprint").is_none());
        assert!(out["choices"][0].get("logprobs").is_none());
        assert_eq!(out["choices"][0]["message"]["content"], "x");
    }

    #[test]
    fn critical_paths_cannot_be_stripped() {
        let profile = profile_with_paths(&[
            "choices[].message.content",
            "choices[].finish_reason",
            "status",
        ]);
        let payload = json!({
            "status": "completed",
            "choices": [{"message": {"content": "keep"}, "finish_reason": "stop"}],
        });
        let out = sanitize_response(&profile, payload.clone());
        assert_eq!(out, payload);
    }

    #[test]
    fn parent_of_critical_path_is_shielded() {
        // Deleting choices[].message would take message.content with it.
        let profile = profile_with_paths(&["choices[].message", "choices"]);
        let payload = json!({"choices": [{"message": {"content": "keep"}}]});
        let out = sanitize_response(&profile, payload.clone());
        assert_eq!(out, payload);
    }

    #[test]
    fn sibling_of_critical_path_is_fair_game() {
        let profile = profile_with_paths(&["choices[].message.refusal"]);
        let payload = json!({
            "choices": [{"message": {"content": "keep", "refusal": null}}],
        });
        let out = sanitize_response(&profile, payload);
        assert!(out["choices"][0]["message"].get("refusal").is_none());
        assert_eq!(out["choices"][0]["message"]["content"], "keep");
    }
}
