use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use tracing::{debug, warn};

use routecodex_common::{ErrorCode, GatewayError, ProviderRuntimeMetadata, UserAgentMode};
use routecodex_protocol::ProviderType;

use crate::client::{ByteStream, TransportBody, TransportClient, TransportFailure, TransportRequest};
use crate::config::ProviderConfig;
use crate::credentials::CredentialSource;
use crate::endpoint::{resolve_model_url, resolve_request_url};
use crate::headers::{build_headers, mask_headers, resolve_static_api_key};
use crate::retry::{backoff_delay, is_retryable_failure, is_retryable_status, parse_retry_after};
use crate::shape::assert_request_shape;
use crate::snapshot::{NoopSnapshotSink, Snapshot, SnapshotPhase, SnapshotSink};

/// Key marking an SSE carrier payload; downstream nodes must not reshape a
/// payload wearing it.
pub const SSE_CARRIER_KEY: &str = "__sse_responses";

/// Synthetic status for transport-level failures that never produced an
/// HTTP response.
const NETWORK_ERROR_STATUS: u16 = 599;

const BODY_EXCERPT_CHARS: usize = 256;

#[derive(Debug)]
pub enum ProviderResponse {
    Json(Value),
    /// Raw upstream SSE bytes. Once this is handed out, the transport never
    /// retries: bytes are considered committed to the client.
    Stream(ByteStream),
}

/// Sends processed requests to the chosen upstream, with bounded retries,
/// a single 401 refresh-and-replay, and snapshot notifications.
pub struct ProviderTransport {
    client: Arc<dyn TransportClient>,
    credentials: Option<Arc<dyn CredentialSource>>,
    snapshots: Arc<dyn SnapshotSink>,
    ua_mode: UserAgentMode,
}

impl ProviderTransport {
    pub fn new(client: Arc<dyn TransportClient>) -> Self {
        Self {
            client,
            credentials: None,
            snapshots: Arc::new(NoopSnapshotSink),
            ua_mode: UserAgentMode::Default,
        }
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialSource>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_snapshots(mut self, snapshots: Arc<dyn SnapshotSink>) -> Self {
        self.snapshots = snapshots;
        self
    }

    pub fn with_ua_mode(mut self, ua_mode: UserAgentMode) -> Self {
        self.ua_mode = ua_mode;
        self
    }

    pub async fn execute(
        &self,
        config: &ProviderConfig,
        meta: &ProviderRuntimeMetadata,
        mut payload: Value,
        auth_override: Option<&str>,
        client_headers: &[(String, String)],
        stream: bool,
    ) -> Result<ProviderResponse, GatewayError> {
        let protocol = config.provider_type.protocol();
        assert_request_shape(protocol, &payload)?;

        // Gemini addresses the model in the URL path; the body must not
        // repeat it.
        let url = if config.provider_type == ProviderType::Gemini {
            let model = payload
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or("gemini-pro")
                .to_string();
            if let Value::Object(map) = &mut payload {
                map.remove("model");
            }
            resolve_model_url(config, &model, stream)
        } else {
            resolve_request_url(config)
        };
        if let Value::Object(map) = &mut payload {
            if stream {
                map.insert("stream".to_string(), Value::Bool(true));
            } else {
                map.remove("stream");
            }
        }

        let body = Bytes::from(
            serde_json::to_vec(&payload)
                .map_err(|err| GatewayError::upstream_http(NETWORK_ERROR_STATUS, err.to_string()))?,
        );

        let mut token = self.resolve_token(config, auth_override).await;
        let max_attempts = config.retry.max_attempts.max(1);
        let mut attempt: u32 = 1;
        let mut replayed_after_401 = false;
        let mut request_snapshot_taken = false;

        loop {
            let headers = build_headers(config, self.ua_mode, token.as_deref(), stream, client_headers);
            if !request_snapshot_taken {
                request_snapshot_taken = true;
                self.snapshots.record(Snapshot {
                    request_id: meta.request_id.clone(),
                    protocol: protocol.as_str().to_string(),
                    phase: SnapshotPhase::ProviderRequest,
                    payload: payload.clone(),
                    headers: mask_headers(&headers),
                });
                if has_vision_content(&payload) {
                    self.snapshots.record(Snapshot {
                        request_id: meta.request_id.clone(),
                        protocol: protocol.as_str().to_string(),
                        phase: SnapshotPhase::ProviderBodyDebug,
                        payload: payload.clone(),
                        headers: Vec::new(),
                    });
                }
            }

            let request = TransportRequest {
                url: url.clone(),
                headers,
                body: body.clone(),
                stream,
            };

            match self.client.send(request).await {
                Ok(resp) if (200..300).contains(&resp.status) => {
                    return match resp.body {
                        TransportBody::Stream(receiver) => Ok(ProviderResponse::Stream(receiver)),
                        TransportBody::Bytes(bytes) => {
                            let value: Value = serde_json::from_slice(&bytes).map_err(|_| {
                                GatewayError::upstream_http(resp.status, excerpt(&bytes))
                                    .with_detail("reason", "non-JSON success body")
                            })?;
                            self.snapshots.record(Snapshot {
                                request_id: meta.request_id.clone(),
                                protocol: protocol.as_str().to_string(),
                                phase: SnapshotPhase::ProviderResponse,
                                payload: value.clone(),
                                headers: mask_headers(&resp.headers),
                            });
                            Ok(ProviderResponse::Json(value))
                        }
                    };
                }
                Ok(resp) => {
                    let status = resp.status;
                    let bytes = match resp.body {
                        TransportBody::Bytes(bytes) => bytes,
                        TransportBody::Stream(_) => Bytes::new(),
                    };

                    // Upstream 401: one refresh-and-replay with fresh headers.
                    // Other auth failures are surfaced as-is.
                    if status == 401 && !replayed_after_401 {
                        if let Some(credentials) = &self.credentials {
                            replayed_after_401 = true;
                            match credentials.refresh_credentials(&config.provider_id).await {
                                Ok(fresh) => {
                                    debug!(
                                        provider = %config.provider_id,
                                        "upstream 401; replaying with refreshed credentials"
                                    );
                                    token = Some(fresh);
                                    continue;
                                }
                                Err(err) => {
                                    self.record_error(meta, protocol.as_str(), status, &bytes);
                                    return Err(err.into_gateway_error());
                                }
                            }
                        }
                    }

                    if is_retryable_status(status) && attempt < max_attempts {
                        let retry_after = if status == 429 {
                            parse_retry_after(&resp.headers)
                        } else {
                            None
                        };
                        let delay = backoff_delay(&config.retry, attempt, retry_after);
                        warn!(
                            provider = %config.provider_id,
                            status,
                            attempt,
                            "retryable upstream status; backing off"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }

                    self.record_error(meta, protocol.as_str(), status, &bytes);
                    return Err(GatewayError::upstream_http(status, excerpt(&bytes)));
                }
                Err(failure) => {
                    if is_retryable_failure(&failure) && attempt < max_attempts {
                        let delay = backoff_delay(&config.retry, attempt, None);
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    self.record_error(meta, protocol.as_str(), NETWORK_ERROR_STATUS, &Bytes::new());
                    return Err(failure_to_error(failure));
                }
            }
        }
    }

    /// Key resolution priority: per-request override, OAuth manager token,
    /// configured static key, environment fallbacks. `None` sends no
    /// Authorization header (local providers).
    async fn resolve_token(
        &self,
        config: &ProviderConfig,
        auth_override: Option<&str>,
    ) -> Option<String> {
        if let Some(token) = auth_override {
            return Some(token.to_string());
        }
        if let Some(credentials) = &self.credentials {
            // iFlow couples a plain API key to the OAuth identity; when the
            // stored credential carries one, it wins over the access token.
            if config.provider_type == ProviderType::Iflow
                && let Some(api_key) = credentials.get_api_key(&config.provider_id).await
            {
                return Some(api_key);
            }
            match credentials.get_token(&config.provider_id).await {
                Ok(token) => return Some(token),
                Err(err) => {
                    debug!(provider = %config.provider_id, %err, "no OAuth token; trying static key");
                }
            }
        }
        resolve_static_api_key(config)
    }

    fn record_error(
        &self,
        meta: &ProviderRuntimeMetadata,
        protocol: &str,
        status: u16,
        body: &Bytes,
    ) {
        self.snapshots.record(Snapshot {
            request_id: meta.request_id.clone(),
            protocol: protocol.to_string(),
            phase: SnapshotPhase::ProviderError,
            payload: serde_json::json!({"status": status, "body": excerpt(body)}),
            headers: Vec::new(),
        });
    }
}

/// Vision payloads get a raw body capture in addition to the request
/// snapshot.
fn has_vision_content(payload: &Value) -> bool {
    let Some(messages) = payload.get("messages").and_then(Value::as_array) else {
        return false;
    };
    messages.iter().any(|message| {
        message
            .get("content")
            .and_then(Value::as_array)
            .is_some_and(|parts| {
                parts.iter().any(|part| {
                    part.get("image_url").is_some()
                        || part.get("type").and_then(Value::as_str) == Some("image")
                })
            })
    })
}

fn excerpt(bytes: &Bytes) -> String {
    String::from_utf8_lossy(bytes)
        .chars()
        .take(BODY_EXCERPT_CHARS)
        .collect()
}

fn failure_to_error(failure: TransportFailure) -> GatewayError {
    match failure {
        TransportFailure::Transport { kind, message } => {
            GatewayError::new(
                ErrorCode::UpstreamHttp(NETWORK_ERROR_STATUS),
                format!("upstream transport failure: {message}"),
            )
            .with_detail("kind", format!("{kind:?}"))
        }
        TransportFailure::Http { status, body, .. } => {
            GatewayError::upstream_http(status, excerpt(&body))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use routecodex_auth::AuthError;
    use routecodex_protocol::ProviderType;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedClient {
        calls: AtomicUsize,
        script: Mutex<Vec<ScriptStep>>,
        seen_auth: Mutex<Vec<Option<String>>>,
        seen_requests: Mutex<Vec<(String, Value)>>,
    }

    enum ScriptStep {
        Status(u16, &'static str),
        NetworkError,
        Stream,
    }

    impl ScriptedClient {
        fn new(script: Vec<ScriptStep>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                script: Mutex::new(script),
                seen_auth: Mutex::new(Vec::new()),
                seen_requests: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TransportClient for ScriptedClient {
        async fn send(
            &self,
            request: TransportRequest,
        ) -> Result<crate::client::TransportResponse, TransportFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let auth = request
                .headers
                .iter()
                .find(|(k, _)| k == "authorization")
                .map(|(_, v)| v.clone());
            self.seen_auth.lock().unwrap().push(auth);
            let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
            self.seen_requests
                .lock()
                .unwrap()
                .push((request.url.clone(), body));

            let step = {
                let mut script = self.script.lock().unwrap();
                if script.is_empty() {
                    ScriptStep::Status(200, r#"{"ok":true}"#)
                } else {
                    script.remove(0)
                }
            };
            match step {
                ScriptStep::Status(status, body) => Ok(crate::client::TransportResponse {
                    status,
                    headers: Vec::new(),
                    body: TransportBody::Bytes(Bytes::from_static(body.as_bytes())),
                }),
                ScriptStep::NetworkError => Err(TransportFailure::Transport {
                    kind: crate::client::TransportErrorKind::Connect,
                    message: "connection refused".to_string(),
                }),
                ScriptStep::Stream => {
                    let (tx, rx) = tokio::sync::mpsc::channel(4);
                    tx.try_send(Bytes::from_static(b"data: {}\n\n")).unwrap();
                    Ok(crate::client::TransportResponse {
                        status: 200,
                        headers: Vec::new(),
                        body: TransportBody::Stream(rx),
                    })
                }
            }
        }
    }

    struct ScriptedCredentials {
        refreshes: AtomicUsize,
    }

    #[async_trait]
    impl CredentialSource for ScriptedCredentials {
        async fn get_token(&self, _provider_id: &str) -> Result<String, AuthError> {
            Ok("stale-token".to_string())
        }

        async fn refresh_credentials(&self, _provider_id: &str) -> Result<String, AuthError> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            Ok("fresh-token".to_string())
        }
    }

    fn config() -> ProviderConfig {
        let mut config = ProviderConfig::new("prov", ProviderType::Qwen, "https://u.example");
        config.retry.base_delay = std::time::Duration::from_millis(1);
        config
    }

    fn meta() -> ProviderRuntimeMetadata {
        ProviderRuntimeMetadata {
            request_id: "req_1".to_string(),
            ..ProviderRuntimeMetadata::default()
        }
    }

    fn chat_payload() -> Value {
        json!({"model": "m", "messages": [{"role": "user", "content": "hi"}]})
    }

    #[tokio::test(start_paused = true)]
    async fn upstream_401_recovers_with_one_replay() {
        let client = Arc::new(ScriptedClient::new(vec![
            ScriptStep::Status(401, r#"{"error":"unauthorized"}"#),
            ScriptStep::Status(200, r#"{"choices":[]}"#),
        ]));
        let credentials = Arc::new(ScriptedCredentials {
            refreshes: AtomicUsize::new(0),
        });
        let transport =
            ProviderTransport::new(client.clone()).with_credentials(credentials.clone());

        let out = transport
            .execute(&config(), &meta(), chat_payload(), None, &[], false)
            .await
            .unwrap();
        assert!(matches!(out, ProviderResponse::Json(_)));
        assert_eq!(client.calls(), 2);
        assert_eq!(credentials.refreshes.load(Ordering::SeqCst), 1);
        let seen = client.seen_auth.lock().unwrap();
        assert_eq!(seen[0].as_deref(), Some("Bearer stale-token"));
        assert_eq!(seen[1].as_deref(), Some("Bearer fresh-token"));
    }

    #[tokio::test(start_paused = true)]
    async fn second_401_is_not_replayed_again() {
        let client = Arc::new(ScriptedClient::new(vec![
            ScriptStep::Status(401, "{}"),
            ScriptStep::Status(401, "{}"),
        ]));
        let credentials = Arc::new(ScriptedCredentials {
            refreshes: AtomicUsize::new(0),
        });
        let transport =
            ProviderTransport::new(client.clone()).with_credentials(credentials.clone());

        let err = transport
            .execute(&config(), &meta(), chat_payload(), None, &[], false)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::UpstreamHttp(401));
        assert_eq!(client.calls(), 2);
        assert_eq!(credentials.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_5xx_is_retried_up_to_budget() {
        let client = Arc::new(ScriptedClient::new(vec![
            ScriptStep::Status(503, "busy"),
            ScriptStep::Status(503, "busy"),
            ScriptStep::Status(200, r#"{"choices":[]}"#),
        ]));
        let transport = ProviderTransport::new(client.clone());
        let out = transport
            .execute(&config(), &meta(), chat_payload(), Some("k"), &[], false)
            .await
            .unwrap();
        assert!(matches!(out, ProviderResponse::Json(_)));
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_the_status() {
        let client = Arc::new(ScriptedClient::new(vec![
            ScriptStep::Status(503, "busy"),
            ScriptStep::Status(503, "busy"),
            ScriptStep::Status(503, "busy"),
        ]));
        let transport = ProviderTransport::new(client.clone());
        let err = transport
            .execute(&config(), &meta(), chat_payload(), Some("k"), &[], false)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::UpstreamHttp(503));
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_400_fails_immediately() {
        let client = Arc::new(ScriptedClient::new(vec![ScriptStep::Status(400, "bad")]));
        let transport = ProviderTransport::new(client.clone());
        let err = transport
            .execute(&config(), &meta(), chat_payload(), Some("k"), &[], false)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::UpstreamHttp(400));
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn network_errors_are_retried() {
        let client = Arc::new(ScriptedClient::new(vec![
            ScriptStep::NetworkError,
            ScriptStep::Status(200, r#"{"choices":[]}"#),
        ]));
        let transport = ProviderTransport::new(client.clone());
        let out = transport
            .execute(&config(), &meta(), chat_payload(), Some("k"), &[], false)
            .await
            .unwrap();
        assert!(matches!(out, ProviderResponse::Json(_)));
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn streaming_success_returns_the_carrier() {
        let client = Arc::new(ScriptedClient::new(vec![ScriptStep::Stream]));
        let transport = ProviderTransport::new(client.clone());
        let out = transport
            .execute(&config(), &meta(), chat_payload(), Some("k"), &[], true)
            .await
            .unwrap();
        match out {
            ProviderResponse::Stream(mut rx) => {
                let chunk = rx.recv().await.unwrap();
                assert_eq!(&chunk[..], b"data: {}\n\n");
            }
            other => panic!("expected stream, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn gemini_model_moves_into_the_path() {
        let client = Arc::new(ScriptedClient::new(vec![ScriptStep::Status(
            200,
            r#"{"candidates":[]}"#,
        )]));
        let transport = ProviderTransport::new(client.clone());
        let mut config = ProviderConfig::new("gem", ProviderType::Gemini, "https://g.example");
        config.retry.base_delay = std::time::Duration::from_millis(1);

        transport
            .execute(
                &config,
                &meta(),
                json!({"model": "gemini-pro", "contents": []}),
                Some("k"),
                &[],
                false,
            )
            .await
            .unwrap();

        let seen = client.seen_requests.lock().unwrap();
        let (url, body) = &seen[0];
        assert_eq!(
            url.as_str(),
            "https://g.example/v1beta/models/gemini-pro:generateContent"
        );
        assert!(body.get("model").is_none());
        assert!(body.get("contents").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn shape_drift_fails_before_any_io() {
        let client = Arc::new(ScriptedClient::new(Vec::new()));
        let transport = ProviderTransport::new(client.clone());
        let err = transport
            .execute(&config(), &meta(), json!({"input": "x"}), Some("k"), &[], false)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::CompatProtocolDrift);
        assert_eq!(client.calls(), 0);
    }
}
