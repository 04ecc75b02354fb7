use std::time::Duration;

use routecodex_protocol::ProviderType;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Ceiling for any single backoff sleep, jitter included.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

/// Static configuration for one upstream provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub provider_id: String,
    pub provider_type: ProviderType,
    pub base_url: String,
    /// Configured static key; OAuth and per-request overrides take priority.
    pub api_key: Option<String>,
    /// Prefix in front of the token inside `Authorization`.
    pub auth_prefix: String,
    pub custom_headers: Vec<(String, String)>,
    pub retry: RetryPolicy,
}

impl ProviderConfig {
    pub fn new(provider_id: &str, provider_type: ProviderType, base_url: &str) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            provider_type,
            base_url: base_url.to_string(),
            api_key: None,
            auth_prefix: "Bearer ".to_string(),
            custom_headers: Vec::new(),
            retry: RetryPolicy::default(),
        }
    }
}
