use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    ReadTimeout,
    Connect,
    Dns,
    Tls,
    Other,
}

#[derive(Debug)]
pub enum TransportFailure {
    /// Transport-level failures (no HTTP response).
    Transport {
        kind: TransportErrorKind,
        message: String,
    },
    /// Non-2xx HTTP response captured as bytes.
    Http {
        status: u16,
        headers: Vec<(String, String)>,
        body: Bytes,
    },
}

#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub stream: bool,
}

pub type ByteStream = tokio::sync::mpsc::Receiver<Bytes>;

#[derive(Debug)]
pub enum TransportBody {
    Bytes(Bytes),
    Stream(ByteStream),
}

#[derive(Debug)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: TransportBody,
}

/// IO boundary under the provider transport; injected so the retry loop is
/// testable without a network.
#[async_trait]
pub trait TransportClient: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportFailure>;
}

#[derive(Debug, Clone)]
pub struct TransportClientConfig {
    pub proxy: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// An SSE read stalling longer than this closes the stream.
    pub stream_idle_timeout: Duration,
}

impl Default for TransportClientConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(86400),
            stream_idle_timeout: Duration::from_secs(30),
        }
    }
}

/// wreq-backed client with one cached `Client` per proxy value. Connection
/// pooling inside wreq makes instances safe for concurrent writes.
#[derive(Clone)]
pub struct WreqTransportClient {
    config: TransportClientConfig,
    clients: Arc<Mutex<HashMap<Option<String>, wreq::Client>>>,
}

impl WreqTransportClient {
    pub fn new(config: TransportClientConfig) -> Result<Self, wreq::Error> {
        let proxy = normalize_proxy(config.proxy.clone());
        let initial = build_client(&config, proxy.as_deref())?;
        let mut clients = HashMap::new();
        clients.insert(proxy, initial);
        Ok(Self {
            config,
            clients: Arc::new(Mutex::new(clients)),
        })
    }

    fn client(&self) -> Result<wreq::Client, TransportFailure> {
        let proxy = normalize_proxy(self.config.proxy.clone());
        let mut guard = self.clients.lock().map_err(|_| TransportFailure::Transport {
            kind: TransportErrorKind::Other,
            message: "transport client cache lock failed".to_string(),
        })?;
        if let Some(client) = guard.get(&proxy) {
            return Ok(client.clone());
        }
        let client = build_client(&self.config, proxy.as_deref()).map_err(map_wreq_error)?;
        guard.insert(proxy, client.clone());
        Ok(client)
    }
}

fn normalize_proxy(value: Option<String>) -> Option<String> {
    value
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
}

fn build_client(
    config: &TransportClientConfig,
    proxy: Option<&str>,
) -> Result<wreq::Client, wreq::Error> {
    let mut builder = wreq::Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.request_timeout)
        .read_timeout(config.stream_idle_timeout);
    if let Some(proxy) = proxy {
        builder = builder.proxy(wreq::Proxy::all(proxy)?);
    }
    builder.build()
}

#[async_trait]
impl TransportClient for WreqTransportClient {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportFailure> {
        let client = self.client()?;
        let mut builder = client.post(&request.url);
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }
        builder = builder.body(request.body);

        let resp = builder.send().await.map_err(map_wreq_error)?;
        convert_response(resp, request.stream, self.config.stream_idle_timeout).await
    }
}

async fn convert_response(
    resp: wreq::Response,
    want_stream: bool,
    stream_idle_timeout: Duration,
) -> Result<TransportResponse, TransportFailure> {
    let status = resp.status().as_u16();
    let headers = headers_from_wreq(resp.headers());

    let is_success = (200..300).contains(&status);
    if !is_success || !want_stream {
        let body = resp.bytes().await.map_err(map_wreq_error)?;
        return Ok(TransportResponse {
            status,
            headers,
            body: TransportBody::Bytes(body),
        });
    }

    // A single reader consumes each upstream SSE stream; dropping the
    // receiver cancels the relay task and with it the HTTP body read.
    let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(16);
    tokio::spawn(async move {
        let mut stream = resp.bytes_stream();
        loop {
            let next = tokio::time::timeout(stream_idle_timeout, stream.next()).await;
            let item = match next {
                Ok(item) => item,
                Err(_) => break,
            };
            let Some(item) = item else {
                break;
            };
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(_) => break,
            };
            if tx.send(chunk).await.is_err() {
                break;
            }
        }
    });

    Ok(TransportResponse {
        status,
        headers,
        body: TransportBody::Stream(rx),
    })
}

fn headers_from_wreq(map: &wreq::header::HeaderMap) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for (key, value) in map {
        if let Ok(text) = value.to_str() {
            out.push((key.as_str().to_string(), text.to_string()));
        }
    }
    out
}

fn map_wreq_error(err: wreq::Error) -> TransportFailure {
    let kind = classify_wreq_error(&err);
    TransportFailure::Transport {
        kind,
        message: err.to_string(),
    }
}

fn classify_wreq_error(err: &wreq::Error) -> TransportErrorKind {
    let message = err.to_string().to_ascii_lowercase();
    if err.is_timeout() {
        if message.contains("read") || message.contains("idle") {
            return TransportErrorKind::ReadTimeout;
        }
        return TransportErrorKind::Timeout;
    }
    if err.is_connect() {
        if message.contains("dns") || message.contains("resolve") {
            return TransportErrorKind::Dns;
        }
        if message.contains("tls") || message.contains("ssl") {
            return TransportErrorKind::Tls;
        }
        return TransportErrorKind::Connect;
    }
    if message.contains("tls") || message.contains("ssl") {
        return TransportErrorKind::Tls;
    }
    TransportErrorKind::Other
}
