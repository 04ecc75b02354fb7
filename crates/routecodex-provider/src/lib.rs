//! Upstream provider transport: endpoint/auth resolution, header building,
//! the shared HTTP/SSE client, the retry + 401-recovery loop, and the
//! snapshot observer hook.

pub mod client;
pub mod config;
pub mod credentials;
pub mod endpoint;
pub mod headers;
pub mod retry;
pub mod shape;
pub mod snapshot;
pub mod transport;

pub use client::{
    TransportBody, TransportClient, TransportClientConfig, TransportErrorKind, TransportFailure,
    TransportRequest, TransportResponse, WreqTransportClient,
};
pub use config::{ProviderConfig, RetryPolicy};
pub use credentials::CredentialSource;
pub use endpoint::resolve_request_url;
pub use headers::{build_headers, mask_headers, resolve_static_api_key};
pub use shape::assert_request_shape;
pub use snapshot::{NoopSnapshotSink, Snapshot, SnapshotPhase, SnapshotSink};
pub use transport::{ProviderResponse, ProviderTransport, SSE_CARRIER_KEY};
