use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use routecodex_common::{ErrorCode, GatewayError, PipelinePhase};
use routecodex_protocol::{ProcessMode, ProviderProtocol, StreamingMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Llmswitch,
    Workflow,
    Compatibility,
    Provider,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Llmswitch => "llmswitch",
            NodeKind::Workflow => "workflow",
            NodeKind::Compatibility => "compatibility",
            NodeKind::Provider => "provider",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDescriptor {
    pub id: String,
    pub kind: NodeKind,
    pub implementation: String,
    #[serde(default)]
    pub options: Value,
}

/// One entry of the generated pipeline config document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineDescriptor {
    pub id: String,
    pub name: String,
    #[serde(default = "default_phase")]
    pub phase: PipelinePhase,
    pub entry_endpoints: Vec<String>,
    pub provider_protocols: Vec<ProviderProtocol>,
    #[serde(default)]
    pub process_mode: ProcessMode,
    #[serde(default)]
    pub streaming: StreamingMode,
    pub nodes: Vec<NodeDescriptor>,
}

fn default_phase() -> PipelinePhase {
    PipelinePhase::Request
}

/// Immutable, validated plan for one (entry-endpoint, phase) pair.
#[derive(Debug, Clone)]
pub struct PipelineBlueprint {
    pub id: String,
    pub name: String,
    pub phase: PipelinePhase,
    /// Normalized: lowercase, trimmed.
    pub entry_endpoints: Vec<String>,
    pub provider_protocols: Vec<ProviderProtocol>,
    pub process_mode: ProcessMode,
    pub streaming: StreamingMode,
    pub nodes: Vec<NodeDescriptor>,
}

impl PipelineBlueprint {
    pub fn from_descriptor(descriptor: PipelineDescriptor) -> Result<Self, GatewayError> {
        if descriptor.nodes.is_empty() {
            return Err(invalid(&descriptor.id, "nodes must be non-empty"));
        }
        if descriptor.provider_protocols.is_empty() {
            return Err(invalid(&descriptor.id, "providerProtocols must be non-empty"));
        }
        let entry_endpoints: Vec<String> = descriptor
            .entry_endpoints
            .iter()
            .map(|endpoint| endpoint.trim().to_ascii_lowercase())
            .filter(|endpoint| !endpoint.is_empty())
            .collect();
        if entry_endpoints.is_empty() {
            return Err(invalid(&descriptor.id, "entryEndpoints must be non-empty"));
        }
        Ok(Self {
            id: descriptor.id,
            name: descriptor.name,
            phase: descriptor.phase,
            entry_endpoints,
            provider_protocols: descriptor.provider_protocols,
            process_mode: descriptor.process_mode,
            streaming: descriptor.streaming,
            nodes: descriptor.nodes,
        })
    }
}

fn invalid(id: &str, message: &str) -> GatewayError {
    GatewayError::new(
        ErrorCode::ProtocolMismatch,
        format!("invalid pipeline {id}: {message}"),
    )
    .with_detail("pipelineId", id)
}

/// `~/.routecodex/pipeline-config.generated.json` document shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlueprintDocument {
    pub pipelines: Vec<PipelineDescriptor>,
}

impl BlueprintDocument {
    pub fn parse(raw: &[u8]) -> Result<Self, GatewayError> {
        serde_json::from_slice(raw).map_err(|err| {
            GatewayError::new(
                ErrorCode::ProtocolMismatch,
                format!("invalid pipeline config document: {err}"),
            )
        })
    }

    pub async fn load(path: &Path) -> Result<Self, GatewayError> {
        let raw = tokio::fs::read(path).await.map_err(|err| {
            GatewayError::new(
                ErrorCode::ProtocolMismatch,
                format!("cannot read pipeline config {}: {err}", path.display()),
            )
        })?;
        Self::parse(&raw)
    }
}
