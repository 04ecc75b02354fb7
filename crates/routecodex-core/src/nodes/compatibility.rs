use async_trait::async_trait;
use serde_json::Value;

use routecodex_common::GatewayResult;
use routecodex_compat::{CompatProfile, normalize_tool_arguments, sanitize_request, sanitize_response};
use routecodex_provider::SSE_CARRIER_KEY;

use crate::context::PipelineContext;
use crate::module::PipelineModule;
use crate::nodes::EXTRA_TOOLS;

/// Provider-family quirk node. Request and response sanitizers plus the
/// tool-argument normalizer, all driven by the profile config.
pub struct CompatibilityModule {
    profile: CompatProfile,
}

impl CompatibilityModule {
    pub fn from_options(options: &Value) -> Self {
        let profile = match options.get("profile") {
            Some(Value::String(name)) => CompatProfile::for_name(name),
            Some(inline @ Value::Object(_)) => {
                serde_json::from_value(inline.clone()).unwrap_or_else(|_| {
                    CompatProfile::passthrough("invalid-inline-profile")
                })
            }
            _ => CompatProfile::passthrough("default"),
        };
        Self { profile }
    }

    pub fn factory() -> impl Fn(&Value) -> GatewayResult<std::sync::Arc<dyn PipelineModule>>
    + Send
    + Sync
    + 'static {
        |options| {
            Ok(std::sync::Arc::new(Self::from_options(options)) as std::sync::Arc<dyn PipelineModule>)
        }
    }
}

#[async_trait]
impl PipelineModule for CompatibilityModule {
    fn module_type(&self) -> &str {
        "compatibility"
    }

    async fn process_incoming(
        &self,
        request: Value,
        ctx: &mut PipelineContext,
    ) -> GatewayResult<Value> {
        // Capture schemas before sanitizing: blacklisted keys must not feed
        // the normalizer either.
        let sanitized = sanitize_request(&self.profile, request);
        if let Some(tools) = sanitized.get("tools") {
            ctx.extras.insert(EXTRA_TOOLS.to_string(), tools.clone());
        }
        Ok(sanitized)
    }

    async fn process_outgoing(
        &self,
        response: Value,
        ctx: &mut PipelineContext,
    ) -> GatewayResult<Value> {
        // Stream carriers are never reshaped here.
        if response.get(SSE_CARRIER_KEY).is_some() {
            return Ok(response);
        }

        let mut sanitized = sanitize_response(&self.profile, response);
        if self.profile.normalize_tool_args
            && let Some(tools) = ctx.extras.get(EXTRA_TOOLS).cloned()
        {
            sanitized = normalize_tool_arguments(sanitized, &tools);
        }
        Ok(sanitized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use routecodex_common::{ProviderRuntimeMetadata, RequestMetadata};
    use serde_json::json;

    fn ctx() -> PipelineContext {
        PipelineContext::new(RequestMetadata::default(), ProviderRuntimeMetadata::default())
    }

    #[tokio::test]
    async fn glm_profile_round_trip() {
        let module = CompatibilityModule::from_options(&json!({"profile": "glm"}));
        let mut ctx = ctx();

        let request = json!({
            "tool_choice": "auto",
            "tools": [{"type": "function", "function": {
                "name": "calc",
                "strict": true,
                "parameters": {"properties": {"a": {"type": "integer"}}},
            }}],
            "messages": [],
        });
        let out = module.process_incoming(request, &mut ctx).await.unwrap();
        assert!(out["tools"][0]["function"].get("strict").is_none());
        assert_eq!(out["tool_choice"], "auto");

        let response = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{"function": {"name": "calc", "arguments": "{\"a\":\"2\"}"}}],
                },
                "finish_reason": "tool_calls",
            }],
        });
        let out = module.process_outgoing(response, &mut ctx).await.unwrap();
        let arguments = out["choices"][0]["message"]["tool_calls"][0]["function"]["arguments"]
            .as_str()
            .unwrap();
        let parsed: Value = serde_json::from_str(arguments).unwrap();
        assert_eq!(parsed["a"], 2);
    }

    #[tokio::test]
    async fn carrier_skips_response_sanitizer() {
        let module = CompatibilityModule::from_options(&json!({"profile": "glm"}));
        let mut ctx = ctx();
        let carrier = json!({"__sse_responses": true});
        let out = module.process_outgoing(carrier.clone(), &mut ctx).await.unwrap();
        assert_eq!(out, carrier);
    }

    #[tokio::test]
    async fn unknown_profile_is_passthrough() {
        let module = CompatibilityModule::from_options(&json!({"profile": "unknown-family"}));
        let mut ctx = ctx();
        let payload = json!({"anything": true});
        let out = module.process_incoming(payload.clone(), &mut ctx).await.unwrap();
        assert_eq!(out, payload);
    }
}
