use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::AuthError;
use crate::http::AuthHttp;
use crate::now_ms;
use crate::store::TokenStorage;

pub const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const EXTRA_POLL_ATTEMPTS: u64 = 5;

#[derive(Debug, Clone)]
pub struct DeviceFlowConfig {
    pub client_id: String,
    pub device_code_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

/// PKCE S256: verifier is 32 random bytes base64url-encoded;
/// challenge = base64url(sha256(verifier)).
pub fn generate_pkce() -> PkcePair {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    let verifier = URL_SAFE_NO_PAD.encode(bytes);
    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
    PkcePair {
        verifier,
        challenge,
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCodeResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    #[serde(default)]
    pub verification_uri_complete: Option<String>,
    pub expires_in: u64,
    #[serde(default = "default_interval")]
    pub interval: u64,
}

fn default_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    project_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenEndpointError {
    #[serde(default)]
    error: String,
}

/// OAuth 2.0 Device Authorization Grant (RFC 8628) against one provider's
/// endpoint pair.
pub struct OAuthDeviceFlow {
    config: DeviceFlowConfig,
    http: Arc<dyn AuthHttp>,
}

impl OAuthDeviceFlow {
    pub fn new(config: DeviceFlowConfig, http: Arc<dyn AuthHttp>) -> Self {
        Self { config, http }
    }

    pub async fn request_device_code(
        &self,
        code_challenge: &str,
    ) -> Result<DeviceCodeResponse, AuthError> {
        let scope = self.config.scopes.join(" ");
        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("scope", scope.as_str()),
            ("code_challenge", code_challenge),
            ("code_challenge_method", "S256"),
        ];
        let (status, body) = self
            .http
            .post_form(&self.config.device_code_url, &form)
            .await?;
        if !(200..300).contains(&status) {
            return Err(AuthError::Http {
                status,
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        Ok(serde_json::from_slice(&body)?)
    }

    /// Poll the token endpoint until the user approves, the code expires, or
    /// the attempt budget (`ceil(expires_in / interval) + 5`) runs out.
    pub async fn poll_for_token(
        &self,
        device: &DeviceCodeResponse,
        code_verifier: &str,
    ) -> Result<TokenStorage, AuthError> {
        let interval = device.interval.max(1);
        let max_attempts = device.expires_in.div_ceil(interval) + EXTRA_POLL_ATTEMPTS;
        let mut wait = Duration::from_secs(interval);

        for attempt in 1..=max_attempts {
            let form = [
                ("grant_type", DEVICE_CODE_GRANT),
                ("device_code", device.device_code.as_str()),
                ("client_id", self.config.client_id.as_str()),
                ("code_verifier", code_verifier),
            ];
            let (status, body) = self.http.post_form(&self.config.token_url, &form).await?;

            if (200..300).contains(&status) {
                let parsed: TokenEndpointResponse = serde_json::from_slice(&body)?;
                return Ok(into_storage(parsed));
            }

            let error = serde_json::from_slice::<TokenEndpointError>(&body)
                .map(|e| e.error)
                .unwrap_or_default();
            match error.as_str() {
                "authorization_pending" => {
                    debug!(attempt, "device authorization pending");
                }
                "slow_down" => {
                    wait = wait.mul_f64(1.5);
                }
                "expired_token" => return Err(AuthError::Timeout),
                "access_denied" => return Err(AuthError::AccessDenied),
                _ => {
                    return Err(AuthError::Http {
                        status,
                        body: String::from_utf8_lossy(&body).into_owned(),
                    });
                }
            }
            if attempt < max_attempts {
                tokio::time::sleep(wait).await;
            }
        }
        Err(AuthError::Timeout)
    }

    pub async fn refresh_tokens(&self, refresh_token: &str) -> Result<TokenStorage, AuthError> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
        ];
        let (status, body) = self.http.post_form(&self.config.token_url, &form).await?;
        if !(200..300).contains(&status) {
            return Err(AuthError::RefreshFailed(format!(
                "HTTP {status}: {}",
                String::from_utf8_lossy(&body)
            )));
        }
        let mut parsed: TokenEndpointResponse = serde_json::from_slice(&body)?;
        // A refresh response may rotate or omit the refresh token.
        if parsed.refresh_token.is_none() {
            parsed.refresh_token = Some(refresh_token.to_string());
        }
        Ok(into_storage(parsed))
    }

    /// Linear back-off: attempt n sleeps `n * 1s` before retrying. The last
    /// error is surfaced when retries are exhausted.
    pub async fn refresh_tokens_with_retry(
        &self,
        refresh_token: &str,
        max_retries: u32,
    ) -> Result<TokenStorage, AuthError> {
        let mut last_error = AuthError::RefreshFailed("no attempts made".to_string());
        for attempt in 1..=max_retries.max(1) {
            match self.refresh_tokens(refresh_token).await {
                Ok(token) => return Ok(token),
                Err(err) => {
                    last_error = err;
                    if attempt < max_retries.max(1) {
                        tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
                    }
                }
            }
        }
        Err(last_error)
    }
}

/// Absolute expiry is computed here, at write time, from `expires_in`; a raw
/// server-side absolute field is never trusted.
fn into_storage(response: TokenEndpointResponse) -> TokenStorage {
    let now = now_ms();
    let expires_in_ms = response.expires_in.unwrap_or(3600) * 1000;
    TokenStorage {
        access_token: response.access_token,
        refresh_token: response.refresh_token,
        token_type: response.token_type.unwrap_or_else(|| "Bearer".to_string()),
        scope: response.scope,
        expires_at: now + expires_in_ms,
        api_key: response.api_key,
        project_id: response.project_id,
        created_at: now,
        updated_at: now,
    }
}
