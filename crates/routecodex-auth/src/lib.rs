//! OAuth token lifecycle for upstream providers.
//!
//! Three layers: the on-disk token store (`store`), the OAuth 2.0 Device
//! Authorization Grant with PKCE (`device_flow`), and the per-provider
//! session manager (`manager`) that owns proactive refresh timers and the
//! single-flight refresh gate used at request time.

pub mod device_flow;
pub mod error;
pub mod http;
pub mod manager;
pub mod store;

pub use device_flow::{
    DeviceCodeResponse, DeviceFlowConfig, OAuthDeviceFlow, PkcePair, generate_pkce,
};
pub use error::AuthError;
pub use http::{AuthHttp, WreqAuthHttp};
pub use manager::{
    OAuthManager, OAuthManagerConfig, OAuthSessionStatus, SessionState, TokenStatus,
};
pub use store::{TokenFileStat, TokenStorage, TokenStore};

pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
