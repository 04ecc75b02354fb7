use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use routecodex_common::GatewayResult;
use routecodex_protocol::{ProviderProtocol, SseEmitter, SseParser, StreamingMode};
use routecodex_provider::SSE_CARRIER_KEY;
use routecodex_provider::client::ByteStream;
use routecodex_transform::{
    ChatToResponsesStream, ResponsesChatCodec, ResponsesSseConfig, simulate_responses_sse,
};

use crate::context::PipelineContext;
use crate::module::PipelineModule;
use crate::nodes::{EXTRA_CLIENT_PROTOCOL, EXTRA_UPSTREAM_STREAMING};

/// Stream ↔ non-stream adaptation node.
///
/// Inbound it decides whether the upstream call streams; outbound it either
/// re-frames a live chat stream into Responses events or simulates SSE from
/// a completed JSON payload when the client asked to stream.
pub struct WorkflowModule {
    streaming: StreamingMode,
    sse: ResponsesSseConfig,
}

impl WorkflowModule {
    pub fn from_options(options: &Value) -> Self {
        let streaming = options
            .get("streaming")
            .and_then(Value::as_str)
            .map(|mode| match mode {
                "always" => StreamingMode::Always,
                "never" => StreamingMode::Never,
                _ => StreamingMode::Auto,
            })
            .unwrap_or_default();
        Self {
            streaming,
            sse: ResponsesSseConfig::from_env(),
        }
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
impl PipelineModule for WorkflowModule {
    fn module_type(&self) -> &str {
        "workflow"
    }

    async fn process_incoming(
        &self,
        mut request: Value,
        ctx: &mut PipelineContext,
    ) -> GatewayResult<Value> {
        let requested = request
            .get("stream")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        ctx.client_streaming = requested;

        let upstream = match self.streaming {
            StreamingMode::Auto => requested,
            StreamingMode::Always => true,
            StreamingMode::Never => false,
        };
        ctx.extras.insert(
            EXTRA_UPSTREAM_STREAMING.to_string(),
            Value::Bool(upstream),
        );

        // The transport owns the wire-level stream flag.
        if let Value::Object(map) = &mut request {
            map.remove("stream");
        }
        Ok(request)
    }

    async fn process_outgoing(
        &self,
        response: Value,
        ctx: &mut PipelineContext,
    ) -> GatewayResult<Value> {
        let client_protocol = ctx
            .extras
            .get(EXTRA_CLIENT_PROTOCOL)
            .and_then(Value::as_str)
            .and_then(ProviderProtocol::parse);

        if response.get(SSE_CARRIER_KEY).is_some() {
            // Live upstream stream. Re-frame chat chunks into Responses
            // events when that is what the client speaks.
            if client_protocol == Some(ProviderProtocol::OpenAiResponses)
                && let Some(upstream) = ctx.stream.take()
            {
                ctx.stream = Some(adapt_chat_stream_to_responses(upstream));
            }
            return Ok(response);
        }

        // Upstream answered with JSON but the client asked for a stream:
        // simulate incremental delivery.
        if ctx.client_streaming && ctx.stream.is_none() {
            match client_protocol {
                Some(ProviderProtocol::OpenAiResponses) => {
                    // This node runs before the outbound llmswitch, so a
                    // chat-shaped payload is converted here for the replay.
                    let payload = if response.get("choices").is_some() {
                        ResponsesChatCodec.chat_response_to_responses(&response)
                    } else {
                        response.clone()
                    };
                    let events = simulate_responses_sse(&payload, &self.sse);
                    ctx.stream = Some(frame_named_events(events));
                    return Ok(carrier());
                }
                Some(ProviderProtocol::OpenAiChat) => {
                    ctx.stream = Some(frame_single_data_chunk(response));
                    return Ok(carrier());
                }
                _ => {}
            }
        }

        Ok(response)
    }
}

fn carrier() -> Value {
    serde_json::json!({SSE_CARRIER_KEY: true})
}

/// Bridge raw upstream chat SSE bytes into client-facing Responses SSE.
fn adapt_chat_stream_to_responses(mut upstream: ByteStream) -> ByteStream {
    let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(16);
    tokio::spawn(async move {
        let mut parser = SseParser::new();
        let mut transformer = ChatToResponsesStream::new();

        while let Some(chunk) = upstream.recv().await {
            for event in parser.push_bytes(&chunk) {
                if event.is_done() {
                    continue;
                }
                let Ok(parsed) = serde_json::from_str::<Value>(&event.data) else {
                    continue;
                };
                for out in transformer.push_chunk(&parsed) {
                    if send_event(&tx, &out).await.is_err() {
                        return;
                    }
                }
            }
        }
        for event in parser.finish() {
            if event.is_done() {
                continue;
            }
            if let Ok(parsed) = serde_json::from_str::<Value>(&event.data) {
                for out in transformer.push_chunk(&parsed) {
                    if send_event(&tx, &out).await.is_err() {
                        return;
                    }
                }
            }
        }
        for out in transformer.finalize() {
            if send_event(&tx, &out).await.is_err() {
                return;
            }
        }
    });
    rx
}

async fn send_event(
    tx: &tokio::sync::mpsc::Sender<Bytes>,
    event: &Value,
) -> Result<(), tokio::sync::mpsc::error::SendError<Bytes>> {
    let name = event
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("message");
    tx.send(Bytes::from(SseEmitter::frame_event(name, event)))
        .await
}

fn frame_named_events(events: Vec<Value>) -> ByteStream {
    let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(events.len().max(1));
    tokio::spawn(async move {
        for event in events {
            if send_event(&tx, &event).await.is_err() {
                return;
            }
        }
    });
    rx
}

/// Chat clients that asked for a stream over a non-stream upstream get the
/// whole completion as one data frame, then `[DONE]`.
fn frame_single_data_chunk(payload: Value) -> ByteStream {
    let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(2);
    tokio::spawn(async move {
        if tx
            .send(Bytes::from(SseEmitter::frame_data(&payload)))
            .await
            .is_err()
        {
            return;
        }
        let _ = tx.send(Bytes::from(SseEmitter::frame_done())).await;
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use routecodex_common::{ProviderRuntimeMetadata, RequestMetadata};
    use serde_json::json;

    fn ctx() -> PipelineContext {
        PipelineContext::new(RequestMetadata::default(), ProviderRuntimeMetadata::default())
    }

    async fn drain(mut stream: ByteStream) -> String {
        let mut out = String::new();
        while let Some(chunk) = stream.recv().await {
            out.push_str(&String::from_utf8_lossy(&chunk));
        }
        out
    }

    #[tokio::test]
    async fn incoming_records_streaming_and_strips_flag() {
        let module = WorkflowModule::from_options(&json!({}));
        let mut ctx = ctx();
        let out = module
            .process_incoming(json!({"messages": [], "stream": true}), &mut ctx)
            .await
            .unwrap();
        assert!(ctx.client_streaming);
        assert_eq!(ctx.extras[EXTRA_UPSTREAM_STREAMING], true);
        assert!(out.get("stream").is_none());
    }

    #[tokio::test]
    async fn never_mode_forces_non_stream_upstream() {
        let module = WorkflowModule::from_options(&json!({"streaming": "never"}));
        let mut ctx = ctx();
        module
            .process_incoming(json!({"messages": [], "stream": true}), &mut ctx)
            .await
            .unwrap();
        assert!(ctx.client_streaming);
        assert_eq!(ctx.extras[EXTRA_UPSTREAM_STREAMING], false);
    }

    #[tokio::test]
    async fn responses_client_gets_simulated_sse_from_json() {
        let module = WorkflowModule::from_options(&json!({"streaming": "never"}));
        let mut ctx = ctx();
        ctx.client_streaming = true;
        ctx.extras.insert(
            EXTRA_CLIENT_PROTOCOL.to_string(),
            json!("openai-responses"),
        );
        let payload = json!({
            "id": "r1",
            "output": [{"type": "message", "content": [{"text": "hi"}]}],
        });
        let out = module.process_outgoing(payload, &mut ctx).await.unwrap();
        assert!(out.get(SSE_CARRIER_KEY).is_some());
        let framed = drain(ctx.stream.take().unwrap()).await;
        assert!(framed.starts_with("event: response.created\n"));
        assert!(framed.contains("event: response.output_text.delta"));
        assert!(framed.contains("\"delta\":\"hi\""));
        assert!(framed.contains("event: response.done"));
    }

    #[tokio::test]
    async fn chat_client_gets_single_chunk_and_done() {
        let module = WorkflowModule::from_options(&json!({}));
        let mut ctx = ctx();
        ctx.client_streaming = true;
        ctx.extras
            .insert(EXTRA_CLIENT_PROTOCOL.to_string(), json!("openai-chat"));
        let out = module
            .process_outgoing(json!({"id": "c1", "choices": []}), &mut ctx)
            .await
            .unwrap();
        assert!(out.get(SSE_CARRIER_KEY).is_some());
        let framed = drain(ctx.stream.take().unwrap()).await;
        assert!(framed.starts_with("data: {"));
        assert!(framed.ends_with("data: [DONE]\n\n"));
    }

    #[tokio::test]
    async fn live_chat_stream_is_reframed_for_responses_clients() {
        let module = WorkflowModule::from_options(&json!({}));
        let mut ctx = ctx();
        ctx.extras.insert(
            EXTRA_CLIENT_PROTOCOL.to_string(),
            json!("openai-responses"),
        );

        let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(8);
        let chunk = json!({
            "id": "c1", "model": "m", "created": 1,
            "choices": [{"index": 0, "delta": {"content": "hello"}}],
        });
        tx.send(Bytes::from(format!("data: {chunk}\n\n"))).await.unwrap();
        tx.send(Bytes::from_static(b"data: [DONE]\n\n")).await.unwrap();
        drop(tx);
        ctx.stream = Some(rx);

        let out = module
            .process_outgoing(carrier(), &mut ctx)
            .await
            .unwrap();
        assert!(out.get(SSE_CARRIER_KEY).is_some());
        let framed = drain(ctx.stream.take().unwrap()).await;
        assert!(framed.contains("event: response.created"));
        assert!(framed.contains("\"delta\":\"hello\""));
        assert!(framed.contains("event: response.completed"));
        assert!(framed.contains("event: response.done"));
    }

    #[tokio::test]
    async fn non_stream_json_passes_through() {
        let module = WorkflowModule::from_options(&json!({}));
        let mut ctx = ctx();
        let payload = json!({"choices": [{"message": {"content": "x"}}]});
        let out = module.process_outgoing(payload.clone(), &mut ctx).await.unwrap();
        assert_eq!(out, payload);
    }
}
