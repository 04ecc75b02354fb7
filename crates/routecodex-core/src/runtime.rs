use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use routecodex_common::{
    GatewayError, PipelineNodeError, PipelinePhase, ProviderRuntimeMetadata, RequestMetadata,
    new_request_id,
};
use routecodex_provider::client::ByteStream;

use crate::blueprint::{NodeDescriptor, NodeKind, PipelineBlueprint};
use crate::context::{PipelineContext, PipelineExecutionInput};
use crate::module::ModuleRegistry;
use crate::router::{ProviderTarget, VirtualRouter};

const ROUTE_HINT_HEADER: &str = "x-route-hint";
const SESSION_HEADER: &str = "x-session-id";
const ROUTE_HINT_BODY_KEY: &str = "__route_hint";

#[derive(Debug)]
pub enum PipelineOutcome {
    Json(Value),
    /// Client-facing SSE bytes; the front door writes them verbatim.
    Stream(ByteStream),
}

/// Executes one blueprint per request: nodes in declared order on the way
/// in, reverse order on the way out, with full error provenance.
pub struct PipelineRuntime {
    registry: Arc<ModuleRegistry>,
    router: Arc<VirtualRouter>,
}

impl PipelineRuntime {
    pub fn new(registry: Arc<ModuleRegistry>, router: Arc<VirtualRouter>) -> Self {
        Self { registry, router }
    }

    pub fn router(&self) -> &VirtualRouter {
        &self.router
    }

    pub async fn execute(
        &self,
        input: PipelineExecutionInput,
    ) -> Result<PipelineOutcome, GatewayError> {
        let request_id = if input.request_id.trim().is_empty() {
            new_request_id()
        } else {
            input.request_id.clone()
        };
        let session_id = input.header(SESSION_HEADER).map(str::to_string);

        let hint = input
            .header(ROUTE_HINT_HEADER)
            .map(str::to_string)
            .or_else(|| {
                input
                    .body
                    .get(ROUTE_HINT_BODY_KEY)
                    .and_then(Value::as_str)
                    .map(str::to_string)
            });
        let route_name = self
            .router
            .parse_route_hint(hint.as_deref(), session_id.as_deref());

        let target = self.router.select_target(&route_name, session_id.as_deref())?;
        let blueprint = self
            .router
            .resolve_blueprint(
                &input.entry_endpoint,
                None,
                Some(target.provider_protocol),
                Some(target.process_mode),
            )
            .ok_or_else(|| {
                GatewayError::new(
                    routecodex_common::ErrorCode::NoProviderTarget,
                    format!("no pipeline blueprint for endpoint {}", input.entry_endpoint),
                )
                .with_detail("entryEndpoint", input.entry_endpoint.clone())
            })?;

        debug!(
            request_id = %request_id,
            route = %route_name,
            pipeline = %blueprint.id,
            provider = %target.provider_id,
            "pipeline plan resolved"
        );

        let mut ctx = build_context(&request_id, &input, &blueprint, &route_name, &target);
        ctx.client_headers = input
            .headers
            .iter()
            .filter(|(key, _)| !key.starts_with("__"))
            .cloned()
            .collect();

        let mut payload = input.body;
        if let Value::Object(map) = &mut payload {
            map.remove(ROUTE_HINT_BODY_KEY);
        }

        // Inbound: declared order, each node feeding the next.
        let mut executed: Vec<(NodeDescriptor, Arc<dyn crate::module::PipelineModule>)> =
            Vec::with_capacity(blueprint.nodes.len());
        for node in &blueprint.nodes {
            let options = effective_options(node, &target);
            let module = self
                .registry
                .resolve(&node.implementation, &options)
                .map_err(|err| wrap(err, node, &blueprint, &request_id, ctx.phase, "resolve"))?;
            payload = module
                .process_incoming(payload, &mut ctx)
                .await
                .map_err(|err| {
                    wrap(err, node, &blueprint, &request_id, ctx.phase, "process_incoming")
                })?;
            executed.push((node.clone(), module));
        }

        // Outbound: reverse order.
        ctx.phase = PipelinePhase::Response;
        for (node, module) in executed.iter().rev() {
            payload = module
                .process_outgoing(payload, &mut ctx)
                .await
                .map_err(|err| {
                    wrap(err, node, &blueprint, &request_id, ctx.phase, "process_outgoing")
                })?;
        }

        match ctx.stream.take() {
            Some(stream) => Ok(PipelineOutcome::Stream(stream)),
            None => Ok(PipelineOutcome::Json(payload)),
        }
    }
}

fn build_context(
    request_id: &str,
    input: &PipelineExecutionInput,
    blueprint: &PipelineBlueprint,
    route_name: &str,
    target: &ProviderTarget,
) -> PipelineContext {
    let metadata = RequestMetadata {
        request_id: request_id.to_string(),
        entry_endpoint: input.entry_endpoint.trim().to_ascii_lowercase(),
        provider_protocol: target.provider_protocol.as_str().to_string(),
        process_mode: target.process_mode.as_str().to_string(),
        streaming: false,
        route_name: route_name.to_string(),
        pipeline_id: blueprint.id.clone(),
        provider_id: target.provider_id.clone(),
        model_id: target.model_id.clone().unwrap_or_default(),
        session_id: input.header(SESSION_HEADER).map(str::to_string),
    };

    let mut provider_meta = ProviderRuntimeMetadata {
        request_id: request_id.to_string(),
        route_name: route_name.to_string(),
        provider_id: target.provider_id.clone(),
        provider_type: target.provider_type.as_str().to_string(),
        provider_protocol: target.provider_protocol.as_str().to_string(),
        provider_family: target.provider_type.as_str().to_string(),
        target: target.provider_key.clone(),
        compatibility_profile: target.compatibility_profile.clone(),
        pipeline_id: blueprint.id.clone(),
        ..ProviderRuntimeMetadata::default()
    };
    provider_meta.set_extra("entryEndpoint", metadata.entry_endpoint.clone());
    if let Some(ua) = input.header("user-agent") {
        provider_meta.set_extra("userAgent", ua);
    }

    PipelineContext::new(metadata, provider_meta)
}

/// Provider nodes get the routed target merged into their options so the
/// instance cache keys per provider.
fn effective_options(node: &NodeDescriptor, target: &ProviderTarget) -> Value {
    match node.kind {
        NodeKind::Provider => {
            let mut map = as_map(&node.options);
            map.insert(
                "providerId".to_string(),
                Value::String(target.provider_id.clone()),
            );
            map.insert(
                "providerType".to_string(),
                Value::String(target.provider_type.as_str().to_string()),
            );
            if let Some(alias) = &target.key_alias {
                map.insert("keyAlias".to_string(), Value::String(alias.clone()));
            }
            Value::Object(map)
        }
        NodeKind::Compatibility => {
            let mut map = as_map(&node.options);
            if !map.contains_key("profile")
                && let Some(profile) = &target.compatibility_profile
            {
                map.insert("profile".to_string(), Value::String(profile.clone()));
            }
            Value::Object(map)
        }
        _ => node.options.clone(),
    }
}

fn as_map(value: &Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    }
}

fn wrap(
    err: GatewayError,
    node: &NodeDescriptor,
    blueprint: &PipelineBlueprint,
    request_id: &str,
    phase: PipelinePhase,
    stage: &str,
) -> GatewayError {
    PipelineNodeError::wrap(
        err,
        &node.id,
        &node.implementation,
        &blueprint.id,
        request_id,
        phase,
        stage,
    )
    .into_gateway_error()
}
