use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotPhase {
    ProviderRequest,
    ProviderResponse,
    ProviderError,
    /// Raw body capture for vision payloads.
    ProviderBodyDebug,
}

impl SnapshotPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotPhase::ProviderRequest => "provider-request",
            SnapshotPhase::ProviderResponse => "provider-response",
            SnapshotPhase::ProviderError => "provider-error",
            SnapshotPhase::ProviderBodyDebug => "provider-body-debug",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub request_id: String,
    pub protocol: String,
    pub phase: SnapshotPhase,
    pub payload: Value,
    /// Already masked: credential headers arrive truncated.
    pub headers: Vec<(String, String)>,
}

/// Observer hook for the external snapshot writer. Implementations must not
/// block: hand off to a channel or task and return.
pub trait SnapshotSink: Send + Sync {
    fn record(&self, snapshot: Snapshot);
}

pub struct NoopSnapshotSink;

impl SnapshotSink for NoopSnapshotSink {
    fn record(&self, _snapshot: Snapshot) {}
}
