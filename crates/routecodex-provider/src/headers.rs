use routecodex_common::UserAgentMode;
use routecodex_protocol::ProviderType;

use crate::config::ProviderConfig;

/// Client headers eligible for forwarding upstream. Everything else from the
/// caller is dropped, and `__*` keys and `authorization` never pass whatever
/// the list says.
pub const PROPAGATED_CLIENT_HEADERS: &[&str] = &[
    "accept-language",
    "x-request-id",
    "x-session-id",
    "x-client-version",
];

pub fn build_headers(
    config: &ProviderConfig,
    ua_mode: UserAgentMode,
    token: Option<&str>,
    stream: bool,
    client_headers: &[(String, String)],
) -> Vec<(String, String)> {
    let mut headers = vec![
        ("content-type".to_string(), "application/json".to_string()),
        ("user-agent".to_string(), user_agent(config.provider_type, ua_mode)),
    ];

    if let Some(token) = token {
        headers.push((
            "authorization".to_string(),
            format!("{}{token}", config.auth_prefix),
        ));
    }

    for (key, value) in &config.custom_headers {
        headers.push((key.to_ascii_lowercase(), value.clone()));
    }

    for (key, value) in client_headers {
        let key = key.to_ascii_lowercase();
        if key.starts_with("__") || key == "authorization" {
            continue;
        }
        if PROPAGATED_CLIENT_HEADERS.contains(&key.as_str()) {
            headers.push((key, value.clone()));
        }
    }

    headers.push((
        "accept".to_string(),
        if stream {
            "text/event-stream".to_string()
        } else {
            "application/json".to_string()
        },
    ));

    headers
}

fn user_agent(provider_type: ProviderType, ua_mode: UserAgentMode) -> String {
    match ua_mode {
        UserAgentMode::Codex => "codex_cli_rs/0.3.0".to_string(),
        UserAgentMode::Default => format!(
            "routecodex/{} ({})",
            env!("CARGO_PKG_VERSION"),
            provider_type.as_str()
        ),
    }
}

const MASKED_HEADERS: &[&str] = &["authorization", "x-api-key", "api-key"];

/// Truncate credential-bearing header values for snapshots and logs.
pub fn mask_headers(headers: &[(String, String)]) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(key, value)| {
            if MASKED_HEADERS.contains(&key.to_ascii_lowercase().as_str()) {
                (key.clone(), truncate_secret(value))
            } else {
                (key.clone(), value.clone())
            }
        })
        .collect()
}

fn truncate_secret(value: &str) -> String {
    let visible: String = value.chars().take(8).collect();
    format!("{visible}…")
}

/// Static fallbacks after the per-request override and the OAuth manager:
/// the configured key, then `<PROVIDER>_API_KEY` and the family's common
/// environment names.
pub fn resolve_static_api_key(config: &ProviderConfig) -> Option<String> {
    if let Some(key) = &config.api_key
        && !key.trim().is_empty()
    {
        return Some(key.clone());
    }

    let own = format!(
        "{}_API_KEY",
        config
            .provider_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            })
            .collect::<String>()
    );
    let mut candidates = vec![own];
    candidates.extend(
        family_env_keys(config.provider_type)
            .iter()
            .map(|k| k.to_string()),
    );

    for key in candidates {
        if let Ok(value) = std::env::var(&key) {
            let value = value.trim().to_string();
            if !value.is_empty() {
                return Some(value);
            }
        }
    }
    None
}

fn family_env_keys(provider_type: ProviderType) -> &'static [&'static str] {
    match provider_type {
        ProviderType::Openai | ProviderType::Responses => &["OPENAI_API_KEY"],
        ProviderType::Anthropic => &["ANTHROPIC_API_KEY"],
        ProviderType::Gemini => &["GEMINI_API_KEY", "GOOGLE_API_KEY"],
        ProviderType::Iflow => &["IFLOW_API_KEY"],
        ProviderType::Glm => &["GLM_API_KEY", "ZHIPU_API_KEY"],
        ProviderType::Qwen => &["QWEN_API_KEY", "DASHSCOPE_API_KEY"],
        ProviderType::Lmstudio => &["LMSTUDIO_API_KEY"],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;

    fn config() -> ProviderConfig {
        ProviderConfig::new("qwen-main", ProviderType::Qwen, "https://u.example")
    }

    #[test]
    fn auth_header_uses_prefix() {
        let headers = build_headers(&config(), UserAgentMode::Default, Some("tok"), false, &[]);
        let auth = headers.iter().find(|(k, _)| k == "authorization").unwrap();
        assert_eq!(auth.1, "Bearer tok");
    }

    #[test]
    fn no_token_means_no_authorization_header() {
        let headers = build_headers(&config(), UserAgentMode::Default, None, false, &[]);
        assert!(!headers.iter().any(|(k, _)| k == "authorization"));
    }

    #[test]
    fn stream_toggles_accept_header() {
        let headers = build_headers(&config(), UserAgentMode::Default, Some("t"), true, &[]);
        let accept = headers.iter().find(|(k, _)| k == "accept").unwrap();
        assert_eq!(accept.1, "text/event-stream");

        let headers = build_headers(&config(), UserAgentMode::Default, Some("t"), false, &[]);
        let accept = headers.iter().find(|(k, _)| k == "accept").unwrap();
        assert_eq!(accept.1, "application/json");
    }

    #[test]
    fn caller_authorization_and_internal_keys_never_forward() {
        let client_headers = vec![
            ("Authorization".to_string(), "Bearer caller-secret".to_string()),
            ("__route_hint".to_string(), "default".to_string()),
            ("x-request-id".to_string(), "req-1".to_string()),
            ("x-unlisted".to_string(), "nope".to_string()),
        ];
        let headers = build_headers(
            &config(),
            UserAgentMode::Default,
            Some("upstream-token"),
            false,
            &client_headers,
        );
        let auth_values: Vec<&str> = headers
            .iter()
            .filter(|(k, _)| k == "authorization")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(auth_values, vec!["Bearer upstream-token"]);
        assert!(!headers.iter().any(|(k, _)| k.starts_with("__")));
        assert!(headers.iter().any(|(k, v)| k == "x-request-id" && v == "req-1"));
        assert!(!headers.iter().any(|(k, _)| k == "x-unlisted"));
    }

    #[test]
    fn codex_ua_mode_overrides_user_agent() {
        let headers = build_headers(&config(), UserAgentMode::Codex, Some("t"), false, &[]);
        let ua = headers.iter().find(|(k, _)| k == "user-agent").unwrap();
        assert!(ua.1.starts_with("codex_cli_rs/"));
    }

    #[test]
    fn masking_truncates_credentials() {
        let headers = vec![
            ("authorization".to_string(), "Bearer sk-super-secret-token".to_string()),
            ("x-api-key".to_string(), "sk-1234567890".to_string()),
            ("content-type".to_string(), "application/json".to_string()),
        ];
        let masked = mask_headers(&headers);
        assert_eq!(masked[0].1, "Bearer s…");
        assert_eq!(masked[1].1, "sk-12345…");
        assert_eq!(masked[2].1, "application/json");
    }

    #[test]
    fn static_key_prefers_configured_value() {
        let mut config = config();
        config.api_key = Some("configured".to_string());
        assert_eq!(resolve_static_api_key(&config).as_deref(), Some("configured"));
    }
}
