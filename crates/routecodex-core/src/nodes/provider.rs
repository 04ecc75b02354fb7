use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use routecodex_common::{ErrorCode, GatewayError, GatewayResult};
use routecodex_provider::{
    ProviderConfig, ProviderResponse, ProviderTransport, SSE_CARRIER_KEY,
};

use crate::context::PipelineContext;
use crate::module::PipelineModule;
use crate::nodes::{EXTRA_AUTH_OVERRIDE, EXTRA_UPSTREAM_STREAMING};

/// HTTP transport node: the turn-around point of the pipeline.
pub struct ProviderNode {
    transport: Arc<ProviderTransport>,
    config: ProviderConfig,
}

impl ProviderNode {
    pub fn factory(
        transport: Arc<ProviderTransport>,
        provider_configs: HashMap<String, ProviderConfig>,
    ) -> impl Fn(&Value) -> GatewayResult<Arc<dyn PipelineModule>> + Send + Sync + 'static {
        move |options| {
            let provider_id = options
                .get("providerId")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let config = provider_configs.get(provider_id).cloned().ok_or_else(|| {
                GatewayError::new(
                    ErrorCode::UnsupportedProviderType,
                    format!("no transport config for provider {provider_id:?}"),
                )
            })?;
            Ok(Arc::new(ProviderNode {
                transport: transport.clone(),
                config,
            }) as Arc<dyn PipelineModule>)
        }
    }
}

#[async_trait]
impl PipelineModule for ProviderNode {
    fn module_type(&self) -> &str {
        "provider"
    }

    async fn process_incoming(
        &self,
        mut request: Value,
        ctx: &mut PipelineContext,
    ) -> GatewayResult<Value> {
        let stream = ctx
            .extras
            .get(EXTRA_UPSTREAM_STREAMING)
            .and_then(Value::as_bool)
            .unwrap_or(ctx.client_streaming);

        // The routed model wins over whatever the client named.
        if !ctx.metadata.model_id.is_empty()
            && let Value::Object(map) = &mut request
        {
            map.insert(
                "model".to_string(),
                Value::String(ctx.metadata.model_id.clone()),
            );
        }

        let auth_override = ctx
            .extras
            .get(EXTRA_AUTH_OVERRIDE)
            .and_then(Value::as_str)
            .map(str::to_string);

        let response = self
            .transport
            .execute(
                &self.config,
                &ctx.provider_meta,
                request,
                auth_override.as_deref(),
                &ctx.client_headers,
                stream,
            )
            .await?;

        match response {
            ProviderResponse::Json(value) => Ok(value),
            ProviderResponse::Stream(receiver) => {
                ctx.stream = Some(receiver);
                Ok(serde_json::json!({SSE_CARRIER_KEY: true}))
            }
        }
    }

    async fn process_outgoing(
        &self,
        response: Value,
        _ctx: &mut PipelineContext,
    ) -> GatewayResult<Value> {
        Ok(response)
    }
}
