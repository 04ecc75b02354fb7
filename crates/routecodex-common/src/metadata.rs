use std::collections::BTreeMap;

/// Per-request routing metadata carried through the pipeline context.
#[derive(Debug, Clone, Default)]
pub struct RequestMetadata {
    pub request_id: String,
    pub entry_endpoint: String,
    pub provider_protocol: String,
    pub process_mode: String,
    pub streaming: bool,
    pub route_name: String,
    pub pipeline_id: String,
    pub provider_id: String,
    pub model_id: String,
    pub session_id: Option<String>,
}

/// Side-channel attached to a request payload for the transport and the
/// compatibility layer. Deliberately has no `Serialize` impl: it must never
/// reach the wire.
#[derive(Debug, Clone, Default)]
pub struct ProviderRuntimeMetadata {
    pub request_id: String,
    pub route_name: String,
    pub provider_id: String,
    pub provider_type: String,
    pub provider_protocol: String,
    pub provider_family: String,
    pub target: String,
    pub compatibility_profile: Option<String>,
    pub pipeline_id: String,
    /// Free-form entries: entry endpoint, propagated client headers,
    /// user agent, originator, streaming flag.
    pub extra: BTreeMap<String, String>,
}

impl ProviderRuntimeMetadata {
    pub fn set_extra(&mut self, key: &str, value: impl Into<String>) {
        self.extra.insert(key.to_string(), value.into());
    }

    pub fn extra(&self, key: &str) -> Option<&str> {
        self.extra.get(key).map(String::as_str)
    }

    pub fn streaming(&self) -> bool {
        self.extra("streaming").is_some_and(|v| v == "true")
    }
}
