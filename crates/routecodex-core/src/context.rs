use serde_json::{Map, Value};

use routecodex_common::{PipelinePhase, ProviderRuntimeMetadata, RequestMetadata};
use routecodex_provider::client::ByteStream;

/// What the front door hands the core for one request.
#[derive(Debug)]
pub struct PipelineExecutionInput {
    pub request_id: String,
    pub entry_endpoint: String,
    pub body: Value,
    pub headers: Vec<(String, String)>,
    pub metadata: Option<Value>,
}

impl PipelineExecutionInput {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Mutable per-request carrier threaded through every node. Created per
/// request, dropped when the response is finalized; never shared.
pub struct PipelineContext {
    pub phase: PipelinePhase,
    pub metadata: RequestMetadata,
    pub provider_meta: ProviderRuntimeMetadata,
    pub client_headers: Vec<(String, String)>,
    /// Whether the client asked for a streamed answer.
    pub client_streaming: bool,
    /// Live upstream SSE bytes, set by the provider node. A payload wearing
    /// the carrier key travels the outbound chain untouched.
    pub stream: Option<ByteStream>,
    /// Open map for cross-node state (e.g. the request's tool schemas).
    pub extras: Map<String, Value>,
    pub warnings: Vec<String>,
}

impl PipelineContext {
    pub fn new(metadata: RequestMetadata, provider_meta: ProviderRuntimeMetadata) -> Self {
        Self {
            phase: PipelinePhase::Request,
            metadata,
            provider_meta,
            client_headers: Vec::new(),
            client_streaming: false,
            stream: None,
            extras: Map::new(),
            warnings: Vec::new(),
        }
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(request_id = %self.metadata.request_id, "{message}");
        self.warnings.push(message);
    }
}
