use serde_json::Value;

use routecodex_common::{ErrorCode, GatewayError};
use routecodex_protocol::ProviderProtocol;

/// Fail-fast check after the compatibility rewrite: the payload must still
/// look like the protocol the provider expects.
pub fn assert_request_shape(
    protocol: ProviderProtocol,
    payload: &Value,
) -> Result<(), GatewayError> {
    let ok = match protocol {
        ProviderProtocol::OpenAiChat => payload.get("messages").is_some_and(Value::is_array),
        ProviderProtocol::OpenAiResponses => {
            payload.get("input").is_some()
                || payload.get("instructions").is_some()
                || payload.get("output").is_some()
                || payload.get("__sse_responses").is_some()
        }
        ProviderProtocol::AnthropicMessages => {
            payload.get("messages").is_some_and(Value::is_array)
                || payload.get("content").is_some_and(Value::is_array)
        }
        ProviderProtocol::GeminiChat => {
            payload.get("messages").is_some()
                || payload.get("content").is_some()
                || payload.get("contents").is_some()
                || payload.get("candidates").is_some()
        }
    };

    if ok {
        Ok(())
    } else {
        Err(GatewayError::new(
            ErrorCode::CompatProtocolDrift,
            format!(
                "request shape does not match provider protocol {}",
                protocol.as_str()
            ),
        )
        .with_detail("providerProtocol", protocol.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn openai_chat_requires_messages_array() {
        assert!(assert_request_shape(ProviderProtocol::OpenAiChat, &json!({"messages": []})).is_ok());
        let err =
            assert_request_shape(ProviderProtocol::OpenAiChat, &json!({"input": "x"})).unwrap_err();
        assert_eq!(err.code, ErrorCode::CompatProtocolDrift);
    }

    #[test]
    fn responses_accepts_any_of_the_markers() {
        for payload in [
            json!({"input": []}),
            json!({"instructions": "be terse"}),
            json!({"output": []}),
            json!({"__sse_responses": true}),
        ] {
            assert!(assert_request_shape(ProviderProtocol::OpenAiResponses, &payload).is_ok());
        }
        assert!(assert_request_shape(ProviderProtocol::OpenAiResponses, &json!({"messages": []})).is_err());
    }

    #[test]
    fn anthropic_accepts_messages_or_content() {
        assert!(
            assert_request_shape(ProviderProtocol::AnthropicMessages, &json!({"messages": []}))
                .is_ok()
        );
        assert!(
            assert_request_shape(ProviderProtocol::AnthropicMessages, &json!({"content": []}))
                .is_ok()
        );
        assert!(
            assert_request_shape(ProviderProtocol::AnthropicMessages, &json!({"input": []}))
                .is_err()
        );
    }
}
