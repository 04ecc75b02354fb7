use async_trait::async_trait;
use serde_json::Value;

use routecodex_common::{ErrorCode, GatewayError, GatewayResult};
use routecodex_protocol::ProviderProtocol;
use routecodex_provider::SSE_CARRIER_KEY;
use routecodex_transform::{
    AnthropicOpenAiCodec, ConversionResult, GeminiChatCodec, NormalizeConfig, ResponsesChatCodec,
    normalize_openai_payload,
};

use crate::context::PipelineContext;
use crate::module::PipelineModule;
use crate::nodes::{EXTRA_CLIENT_PROTOCOL, EXTRA_TOOLS};

/// Protocol conversion node: client wire shape in, provider wire shape out
/// (and back on the outbound pass).
pub struct LlmSwitchModule {
    client_protocol: ProviderProtocol,
    provider_protocol: ProviderProtocol,
    anthropic: AnthropicOpenAiCodec,
    responses: ResponsesChatCodec,
    gemini: GeminiChatCodec,
    normalize: NormalizeConfig,
}

impl LlmSwitchModule {
    pub fn from_options(options: &Value) -> GatewayResult<Self> {
        let client_protocol = protocol_option(options, "clientProtocol")?;
        let provider_protocol = protocol_option(options, "providerProtocol")?;
        Ok(Self {
            client_protocol,
            provider_protocol,
            anthropic: AnthropicOpenAiCodec::default(),
            responses: ResponsesChatCodec,
            gemini: GeminiChatCodec,
            normalize: NormalizeConfig::default(),
        })
    }

    pub fn factory() -> impl Fn(&Value) -> GatewayResult<std::sync::Arc<dyn PipelineModule>>
    + Send
    + Sync
    + 'static {
        |options| {
            Ok(std::sync::Arc::new(Self::from_options(options)?)
                as std::sync::Arc<dyn PipelineModule>)
        }
    }

    fn client_request_to_chat(&self, request: Value) -> GatewayResult<Value> {
        match self.client_protocol {
            ProviderProtocol::AnthropicMessages => {
                Ok(self.anthropic.anthropic_request_to_chat(&request))
            }
            ProviderProtocol::OpenAiResponses => {
                Ok(self.responses.responses_request_to_chat(&request))
            }
            ProviderProtocol::OpenAiChat => Ok(normalize_openai_payload(request, &self.normalize)),
            ProviderProtocol::GeminiChat => Err(self.unsupported_pair()),
        }
    }

    fn chat_response_to_client(&self, response: Value) -> Value {
        match self.client_protocol {
            ProviderProtocol::AnthropicMessages => {
                self.anthropic.chat_response_to_anthropic(&response)
            }
            ProviderProtocol::OpenAiResponses => self.responses.chat_response_to_responses(&response),
            _ => normalize_openai_payload(response, &self.normalize),
        }
    }

    fn unsupported_pair(&self) -> GatewayError {
        GatewayError::new(
            ErrorCode::ProtocolMismatch,
            format!(
                "no codec for {} -> {}",
                self.client_protocol.as_str(),
                self.provider_protocol.as_str()
            ),
        )
    }
}

fn protocol_option(options: &Value, key: &str) -> GatewayResult<ProviderProtocol> {
    options
        .get(key)
        .and_then(Value::as_str)
        .and_then(ProviderProtocol::parse)
        .ok_or_else(|| {
            GatewayError::new(
                ErrorCode::ProtocolMismatch,
                format!("llmswitch options missing or invalid {key}"),
            )
        })
}

#[async_trait]
impl PipelineModule for LlmSwitchModule {
    fn module_type(&self) -> &str {
        "llmswitch"
    }

    async fn process_incoming(
        &self,
        request: Value,
        ctx: &mut PipelineContext,
    ) -> GatewayResult<Value> {
        ctx.extras.insert(
            EXTRA_CLIENT_PROTOCOL.to_string(),
            Value::String(self.client_protocol.as_str().to_string()),
        );

        // Gemini upstreams compose through the chat shape: client → chat →
        // gemini. Everything else either targets chat directly or is the
        // identity pair.
        let converted = match self.provider_protocol {
            ProviderProtocol::OpenAiChat => self.client_request_to_chat(request)?,
            ProviderProtocol::GeminiChat if self.client_protocol != ProviderProtocol::GeminiChat => {
                let chat = self.client_request_to_chat(request)?;
                self.gemini.chat_request_to_gemini(&chat)
            }
            provider if provider == self.client_protocol => request,
            _ => return Err(self.unsupported_pair()),
        };

        // The provider-shaped tool schemas feed the compatibility layer's
        // argument normalizer on the way back.
        if let Some(tools) = converted.get("tools") {
            ctx.extras.insert(EXTRA_TOOLS.to_string(), tools.clone());
        }

        let result = ConversionResult::new(self.client_protocol, self.provider_protocol, converted);
        ctx.extras.insert(
            "conversion".to_string(),
            serde_json::json!({
                "originalProtocol": result.original_protocol.as_str(),
                "targetProtocol": result.target_protocol.as_str(),
                "convertedAtMs": result.converted_at_ms,
            }),
        );
        Ok(result.payload)
    }

    async fn process_outgoing(
        &self,
        response: Value,
        _ctx: &mut PipelineContext,
    ) -> GatewayResult<Value> {
        if response.get(SSE_CARRIER_KEY).is_some() {
            return Ok(response);
        }

        let converted = match self.provider_protocol {
            ProviderProtocol::OpenAiChat => self.chat_response_to_client(response),
            ProviderProtocol::GeminiChat if self.client_protocol != ProviderProtocol::GeminiChat => {
                let chat = self.gemini.gemini_response_to_chat(&response);
                self.chat_response_to_client(chat)
            }
            provider if provider == self.client_protocol => response,
            _ => return Err(self.unsupported_pair()),
        };
        Ok(converted)
    }
}
