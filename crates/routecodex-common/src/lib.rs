//! Shared infrastructure for the RouteCodex core.
//!
//! This crate intentionally does **not** depend on tokio or any HTTP client.
//! It holds the stable error vocabulary, the per-request runtime metadata
//! side-channel, and base-directory/environment resolution used by every
//! other crate in the workspace.

pub mod basedir;
pub mod error;
pub mod metadata;

pub use basedir::{BaseDirs, SnapshotMode, UserAgentMode};
pub use error::{ErrorCode, GatewayError, GatewayResult, PipelineNodeError, PipelinePhase};
pub use metadata::{ProviderRuntimeMetadata, RequestMetadata};

/// Generate a fresh request id. Format: `req_<uuid-v4-simple>`.
pub fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().simple())
}
