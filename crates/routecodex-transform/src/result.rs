use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

use routecodex_protocol::ProviderProtocol;

/// Codec output: the converted payload plus provenance.
#[derive(Debug, Clone)]
pub struct ConversionResult {
    pub payload: Value,
    pub original_protocol: ProviderProtocol,
    pub target_protocol: ProviderProtocol,
    pub converted_at_ms: u64,
}

impl ConversionResult {
    pub fn new(original: ProviderProtocol, target: ProviderProtocol, payload: Value) -> Self {
        Self {
            payload,
            original_protocol: original,
            target_protocol: target,
            converted_at_ms: now_ms(),
        }
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
