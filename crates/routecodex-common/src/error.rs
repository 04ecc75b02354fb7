use std::fmt;

use serde_json::{Map, Value, json};

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Stable error codes surfaced on the wire and matched by the front door.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    UnsupportedProviderType,
    ProtocolMismatch,
    CompatProtocolDrift,
    NoProviderTarget,
    TokenRefreshFailed,
    OauthTimeout,
    UpstreamHttp(u16),
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::UnsupportedProviderType => write!(f, "ERR_UNSUPPORTED_PROVIDER_TYPE"),
            ErrorCode::ProtocolMismatch => write!(f, "ERR_PROTOCOL_MISMATCH"),
            ErrorCode::CompatProtocolDrift => write!(f, "ERR_COMPAT_PROTOCOL_DRIFT"),
            ErrorCode::NoProviderTarget => write!(f, "ERR_NO_PROVIDER_TARGET"),
            ErrorCode::TokenRefreshFailed => write!(f, "ERR_TOKEN_REFRESH_FAILED"),
            ErrorCode::OauthTimeout => write!(f, "ERR_OAUTH_TIMEOUT"),
            ErrorCode::UpstreamHttp(status) => write!(f, "ERR_UPSTREAM_HTTP_{status}"),
        }
    }
}

/// Structured gateway error: stable code, human message, contextual details.
///
/// Control flow decisions key off `code`, never off `message`.
#[derive(Debug, Clone)]
pub struct GatewayError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Map<String, Value>,
}

impl GatewayError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: Map::new(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn upstream_http(status: u16, body_excerpt: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::UpstreamHttp(status),
            format!("upstream returned HTTP {status}"),
        )
        .with_detail("body", body_excerpt.into())
    }

    /// Wire shape returned to clients: `{error:{message,type,code,details?}}`.
    pub fn to_wire(&self) -> Value {
        let mut error = Map::new();
        error.insert("message".to_string(), Value::String(self.message.clone()));
        error.insert("type".to_string(), Value::String(error_type(self.code)));
        error.insert("code".to_string(), Value::String(self.code.to_string()));
        if !self.details.is_empty() {
            error.insert("details".to_string(), Value::Object(self.details.clone()));
        }
        json!({ "error": error })
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for GatewayError {}

fn error_type(code: ErrorCode) -> String {
    match code {
        ErrorCode::UnsupportedProviderType | ErrorCode::ProtocolMismatch => {
            "invalid_request_error".to_string()
        }
        ErrorCode::NoProviderTarget => "not_found_error".to_string(),
        ErrorCode::TokenRefreshFailed | ErrorCode::OauthTimeout => {
            "authentication_error".to_string()
        }
        ErrorCode::UpstreamHttp(429) => "rate_limit_error".to_string(),
        ErrorCode::CompatProtocolDrift | ErrorCode::UpstreamHttp(_) => "api_error".to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    Request,
    Response,
}

impl PipelinePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelinePhase::Request => "request",
            PipelinePhase::Response => "response",
        }
    }
}

/// A gateway error annotated with the pipeline node it escaped from.
#[derive(Debug, Clone)]
pub struct PipelineNodeError {
    pub node_id: String,
    pub implementation: String,
    pub pipeline_id: String,
    pub request_id: String,
    pub phase: PipelinePhase,
    pub stage: String,
    pub source: GatewayError,
}

impl PipelineNodeError {
    pub fn wrap(
        source: GatewayError,
        node_id: &str,
        implementation: &str,
        pipeline_id: &str,
        request_id: &str,
        phase: PipelinePhase,
        stage: &str,
    ) -> Self {
        Self {
            node_id: node_id.to_string(),
            implementation: implementation.to_string(),
            pipeline_id: pipeline_id.to_string(),
            request_id: request_id.to_string(),
            phase,
            stage: stage.to_string(),
            source,
        }
    }

    /// Flatten back into a `GatewayError` with provenance in `details`.
    pub fn into_gateway_error(self) -> GatewayError {
        self.source
            .with_detail("nodeId", self.node_id)
            .with_detail("implementation", self.implementation)
            .with_detail("pipelineId", self.pipeline_id)
            .with_detail("requestId", self.request_id)
            .with_detail("phase", self.phase.as_str())
            .with_detail("stage", self.stage)
    }
}

impl fmt::Display for PipelineNodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "node {} ({}) in pipeline {} failed during {} {}: {}",
            self.node_id,
            self.implementation,
            self.pipeline_id,
            self.phase.as_str(),
            self.stage,
            self.source
        )
    }
}

impl std::error::Error for PipelineNodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_code_embeds_status() {
        assert_eq!(ErrorCode::UpstreamHttp(503).to_string(), "ERR_UPSTREAM_HTTP_503");
    }

    #[test]
    fn wire_shape_carries_code_and_details() {
        let err = GatewayError::new(ErrorCode::NoProviderTarget, "no healthy target")
            .with_detail("routeName", "default");
        let wire = err.to_wire();
        assert_eq!(wire["error"]["code"], "ERR_NO_PROVIDER_TARGET");
        assert_eq!(wire["error"]["type"], "not_found_error");
        assert_eq!(wire["error"]["details"]["routeName"], "default");
    }

    #[test]
    fn node_error_flattens_provenance() {
        let err = PipelineNodeError::wrap(
            GatewayError::new(ErrorCode::CompatProtocolDrift, "missing messages[]"),
            "node-1",
            "compatibility-glm",
            "pl-openai",
            "req_1",
            PipelinePhase::Request,
            "process_incoming",
        );
        let flat = err.into_gateway_error();
        assert_eq!(flat.details["nodeId"], "node-1");
        assert_eq!(flat.details["phase"], "request");
    }
}
