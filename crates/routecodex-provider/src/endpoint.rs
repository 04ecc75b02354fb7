use routecodex_protocol::ProviderType;

use crate::config::ProviderConfig;

/// Resolve the effective request URL: drop accidental path suffixes that
/// would collide with the family's endpoint path, then append it.
pub fn resolve_request_url(config: &ProviderConfig) -> String {
    let mut base = config.base_url.trim().trim_end_matches('/').to_string();
    for suffix in ["/chat/completions", "/messages", "/responses"] {
        if let Some(stripped) = base.strip_suffix(suffix) {
            base = stripped.to_string();
        }
    }
    for suffix in ["/v1", "/v1beta"] {
        if let Some(stripped) = base.strip_suffix(suffix) {
            base = stripped.to_string();
        }
    }
    format!("{base}{}", config.provider_type.endpoint_path())
}

/// Gemini routes the model into the path; others carry it in the body.
pub fn resolve_model_url(config: &ProviderConfig, model: &str, stream: bool) -> String {
    let url = resolve_request_url(config);
    match config.provider_type {
        ProviderType::Gemini => {
            let verb = if stream {
                "streamGenerateContent"
            } else {
                "generateContent"
            };
            format!("{url}/{model}:{verb}")
        }
        _ => url,
    }
}
