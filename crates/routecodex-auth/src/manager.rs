use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::device_flow::{DeviceFlowConfig, OAuthDeviceFlow, generate_pkce};
use crate::error::AuthError;
use crate::http::AuthHttp;
use crate::now_ms;
use crate::store::{DEFAULT_EXPIRY_BUFFER_MS, TokenStorage, TokenStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Pending,
    Authenticated,
    Expired,
    Error,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Pending => "pending",
            SessionState::Authenticated => "authenticated",
            SessionState::Expired => "expired",
            SessionState::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenStatus {
    pub is_valid: bool,
    pub is_expired: bool,
    pub needs_refresh: bool,
    pub expires_at: u64,
    pub time_to_expiry_ms: i64,
}

#[derive(Debug, Clone)]
pub struct OAuthSessionStatus {
    pub provider_id: String,
    pub status: SessionState,
    pub token_status: Option<TokenStatus>,
    pub last_activity: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OAuthManagerConfig {
    /// A token within this buffer of expiry counts as expired; also the
    /// lead time for proactive refresh.
    pub refresh_buffer_ms: u64,
    /// Minimum spacing between non-forced refreshes per (providerType, tokenFile).
    pub throttle_window: Duration,
    pub max_refresh_retries: u32,
}

impl Default for OAuthManagerConfig {
    fn default() -> Self {
        Self {
            refresh_buffer_ms: DEFAULT_EXPIRY_BUFFER_MS,
            throttle_window: Duration::from_secs(60),
            max_refresh_retries: 3,
        }
    }
}

struct Session {
    provider_type: String,
    alias: String,
    flow: DeviceFlowConfig,
    state: SessionState,
    error: Option<String>,
    last_activity: u64,
    token: Option<TokenStorage>,
    flow_active: bool,
    refresh_timer: Option<JoinHandle<()>>,
}

impl Session {
    /// Store file name follows the `auth-<providerId>` convention.
    fn store_provider(provider_id: &str) -> String {
        format!("auth-{provider_id}")
    }
}

#[derive(Default)]
struct RefreshSlot {
    last_refresh: Option<Instant>,
    in_flight: Option<Arc<OnceCell<Result<TokenStorage, String>>>>,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Session>,
    refreshes: HashMap<String, RefreshSlot>,
}

/// Per-provider OAuth session owner: one active device flow per provider,
/// single-flight + throttled refresh, and proactive refresh timers.
#[derive(Clone)]
pub struct OAuthManager {
    store: Arc<TokenStore>,
    http: Arc<dyn AuthHttp>,
    config: OAuthManagerConfig,
    inner: Arc<Mutex<Inner>>,
    /// Interactive device flows are serialized globally.
    interactive_gate: Arc<Mutex<()>>,
}

impl OAuthManager {
    pub fn new(store: Arc<TokenStore>, http: Arc<dyn AuthHttp>, config: OAuthManagerConfig) -> Self {
        Self {
            store,
            http,
            config,
            inner: Arc::new(Mutex::new(Inner::default())),
            interactive_gate: Arc::new(Mutex::new(())),
        }
    }

    pub async fn register_provider(
        &self,
        provider_id: &str,
        provider_type: &str,
        alias: &str,
        flow: DeviceFlowConfig,
    ) {
        let mut inner = self.inner.lock().await;
        inner.sessions.insert(
            provider_id.to_string(),
            Session {
                provider_type: provider_type.to_string(),
                alias: alias.to_string(),
                flow,
                state: SessionState::Idle,
                error: None,
                last_activity: now_ms(),
                token: None,
                flow_active: false,
                refresh_timer: None,
            },
        );
    }

    /// Run the device flow for a provider. A second call while a flow is
    /// active returns the current status immediately.
    pub async fn authenticate(&self, provider_id: &str) -> Result<OAuthSessionStatus, AuthError> {
        let flow_config = {
            let mut inner = self.inner.lock().await;
            let session = inner
                .sessions
                .get_mut(provider_id)
                .ok_or_else(|| AuthError::UnknownProvider(provider_id.to_string()))?;
            if session.flow_active {
                return Ok(status_of(provider_id, session, self.config.refresh_buffer_ms));
            }
            session.flow_active = true;
            session.state = SessionState::Pending;
            session.last_activity = now_ms();
            session.flow.clone()
        };

        let result = self.run_device_flow(provider_id, flow_config).await;

        let mut inner = self.inner.lock().await;
        let session = inner
            .sessions
            .get_mut(provider_id)
            .ok_or_else(|| AuthError::UnknownProvider(provider_id.to_string()))?;
        session.flow_active = false;
        session.last_activity = now_ms();
        match result {
            Ok(token) => {
                session.state = SessionState::Authenticated;
                session.error = None;
                let expires_at = token.expires_at;
                session.token = Some(token);
                drop(inner);
                self.schedule_proactive_refresh(provider_id, expires_at).await;
                let inner = self.inner.lock().await;
                let session = inner.sessions.get(provider_id).expect("session");
                Ok(status_of(provider_id, session, self.config.refresh_buffer_ms))
            }
            Err(err) => {
                session.state = SessionState::Error;
                session.error = Some(err.to_string());
                Err(err)
            }
        }
    }

    async fn run_device_flow(
        &self,
        provider_id: &str,
        flow_config: DeviceFlowConfig,
    ) -> Result<TokenStorage, AuthError> {
        let _serialized = self.interactive_gate.lock().await;
        let flow = OAuthDeviceFlow::new(flow_config, self.http.clone());
        let pkce = generate_pkce();
        let device = flow.request_device_code(&pkce.challenge).await?;
        info!(
            provider = provider_id,
            user_code = %device.user_code,
            verification_uri = %device.verification_uri,
            "device authorization started"
        );
        let token = flow.poll_for_token(&device, &pkce.verifier).await?;
        self.persist(provider_id, &token).await;
        Ok(token)
    }

    /// Request-time token access: returns a valid access token, refreshing
    /// once (single-flight) when the stored token is past the buffer.
    pub async fn get_token(&self, provider_id: &str) -> Result<String, AuthError> {
        let token = {
            let mut inner = self.inner.lock().await;
            let session = inner
                .sessions
                .get_mut(provider_id)
                .ok_or_else(|| AuthError::UnknownProvider(provider_id.to_string()))?;
            session.last_activity = now_ms();
            if session.token.is_none() {
                session.token = self
                    .store
                    .load(&Session::store_provider(provider_id), &session.alias)
                    .await?;
                if session.token.is_some() && session.state == SessionState::Idle {
                    session.state = SessionState::Authenticated;
                }
            }
            session.token.clone()
        };

        let Some(token) = token else {
            return Err(AuthError::NotAuthenticated(provider_id.to_string()));
        };

        if !token.is_expired(self.config.refresh_buffer_ms) {
            self.ensure_refresh_timer(provider_id, token.expires_at).await;
            return Ok(token.access_token);
        }

        if token.refresh_token.is_none() {
            let mut inner = self.inner.lock().await;
            if let Some(session) = inner.sessions.get_mut(provider_id) {
                session.state = SessionState::Expired;
            }
            return Err(AuthError::NotAuthenticated(provider_id.to_string()));
        }

        let refreshed = self.refresh(provider_id, false).await?;
        Ok(refreshed.access_token)
    }

    /// Forced refresh for upstream-401 recovery: skips the throttle window
    /// but still deduplicates concurrent callers.
    pub async fn refresh_credentials(&self, provider_id: &str) -> Result<String, AuthError> {
        let refreshed = self.refresh(provider_id, true).await?;
        Ok(refreshed.access_token)
    }

    async fn refresh(&self, provider_id: &str, force: bool) -> Result<TokenStorage, AuthError> {
        let (key, flow_config, refresh_token, current) = {
            let inner = self.inner.lock().await;
            let session = inner
                .sessions
                .get(provider_id)
                .ok_or_else(|| AuthError::UnknownProvider(provider_id.to_string()))?;
            let token_file = self
                .store
                .token_path(&Session::store_provider(provider_id), &session.alias);
            let key = format!("{}:{}", session.provider_type, token_file.display());
            let refresh_token = session
                .token
                .as_ref()
                .and_then(|token| token.refresh_token.clone())
                .ok_or_else(|| AuthError::NotAuthenticated(provider_id.to_string()))?;
            (key, session.flow.clone(), refresh_token, session.token.clone())
        };

        // Throttle: inside the window a non-forced refresh reuses the token
        // we already hold.
        let (cell, leader) = {
            let mut inner = self.inner.lock().await;
            let slot = inner.refreshes.entry(key.clone()).or_default();
            if !force
                && slot.in_flight.is_none()
                && let Some(last) = slot.last_refresh
                && last.elapsed() < self.config.throttle_window
                && let Some(current) = current
            {
                return Ok(current);
            }
            match &slot.in_flight {
                Some(cell) => (cell.clone(), false),
                None => {
                    let cell = Arc::new(OnceCell::new());
                    slot.in_flight = Some(cell.clone());
                    (cell, true)
                }
            }
        };

        let flow = OAuthDeviceFlow::new(flow_config, self.http.clone());
        let max_retries = self.config.max_refresh_retries;
        let result = cell
            .get_or_init(|| async {
                flow.refresh_tokens_with_retry(&refresh_token, max_retries)
                    .await
                    .map_err(|err| err.to_string())
            })
            .await
            .clone();

        if leader {
            let mut inner = self.inner.lock().await;
            let slot = inner.refreshes.entry(key).or_default();
            slot.in_flight = None;
            slot.last_refresh = Some(Instant::now());
        }

        match result {
            Ok(token) => {
                if leader {
                    self.persist(provider_id, &token).await;
                    {
                        let mut inner = self.inner.lock().await;
                        if let Some(session) = inner.sessions.get_mut(provider_id) {
                            session.token = Some(token.clone());
                            session.state = SessionState::Authenticated;
                            session.error = None;
                            session.last_activity = now_ms();
                        }
                    }
                    self.schedule_proactive_refresh(provider_id, token.expires_at)
                        .await;
                }
                Ok(token)
            }
            Err(message) => {
                // Refresh failure keeps the old token; the next request may
                // still try it and recover via the 401 replay path.
                let mut inner = self.inner.lock().await;
                if let Some(session) = inner.sessions.get_mut(provider_id) {
                    session.state = SessionState::Error;
                    session.error = Some(message.clone());
                }
                Err(AuthError::RefreshFailed(message))
            }
        }
    }

    /// Token persistence failures are logged, not fatal: the in-memory token
    /// still serves the current request.
    async fn persist(&self, provider_id: &str, token: &TokenStorage) {
        let alias = {
            let inner = self.inner.lock().await;
            inner
                .sessions
                .get(provider_id)
                .map(|session| session.alias.clone())
                .unwrap_or_else(|| "default".to_string())
        };
        if let Err(err) = self
            .store
            .save(&Session::store_provider(provider_id), &alias, token)
            .await
        {
            warn!(provider = provider_id, %err, "failed to persist token; continuing with in-memory copy");
        }
    }

    async fn ensure_refresh_timer(&self, provider_id: &str, expires_at: u64) {
        let needs_timer = {
            let inner = self.inner.lock().await;
            inner
                .sessions
                .get(provider_id)
                .is_some_and(|session| session.refresh_timer.is_none())
        };
        if needs_timer {
            self.schedule_proactive_refresh(provider_id, expires_at).await;
        }
    }

    /// Fires at `expires_at − refresh_buffer`; delay floored at zero.
    fn schedule_proactive_refresh<'a>(
        &'a self,
        provider_id: &'a str,
        expires_at: u64,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let delay_ms = expires_at
                .saturating_sub(now_ms())
                .saturating_sub(self.config.refresh_buffer_ms);
            let manager = self.clone();
            let provider = provider_id.to_string();
            let handle = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                debug!(provider = %provider, "proactive refresh firing");
                if let Err(err) = manager.refresh(&provider, false).await {
                    warn!(provider = %provider, %err, "proactive refresh failed");
                }
            });

            let mut inner = self.inner.lock().await;
            if let Some(session) = inner.sessions.get_mut(provider_id) {
                if let Some(previous) = session.refresh_timer.take() {
                    previous.abort();
                }
                session.refresh_timer = Some(handle);
            } else {
                handle.abort();
            }
        })
    }

    /// The stored credential's coupled API key, when present (iFlow).
    pub async fn stored_api_key(&self, provider_id: &str) -> Option<String> {
        let mut inner = self.inner.lock().await;
        let session = inner.sessions.get_mut(provider_id)?;
        if session.token.is_none() {
            session.token = self
                .store
                .load(&Session::store_provider(provider_id), &session.alias)
                .await
                .ok()
                .flatten();
        }
        session
            .token
            .as_ref()
            .and_then(|token| token.api_key.clone())
            .filter(|key| !key.trim().is_empty())
    }

    pub async fn stop_session(&self, provider_id: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(session) = inner.sessions.get_mut(provider_id) {
            if let Some(timer) = session.refresh_timer.take() {
                timer.abort();
            }
            session.state = SessionState::Idle;
            session.flow_active = false;
            session.error = None;
            session.last_activity = now_ms();
        }
    }

    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        for session in inner.sessions.values_mut() {
            if let Some(timer) = session.refresh_timer.take() {
                timer.abort();
            }
        }
    }

    pub async fn session_status(&self, provider_id: &str) -> Option<OAuthSessionStatus> {
        let inner = self.inner.lock().await;
        inner
            .sessions
            .get(provider_id)
            .map(|session| status_of(provider_id, session, self.config.refresh_buffer_ms))
    }
}

fn status_of(provider_id: &str, session: &Session, buffer_ms: u64) -> OAuthSessionStatus {
    let token_status = session.token.as_ref().map(|token| {
        let is_expired = token.is_expired(0);
        let needs_refresh = token.is_expired(buffer_ms);
        TokenStatus {
            is_valid: !needs_refresh,
            is_expired,
            needs_refresh,
            expires_at: token.expires_at,
            time_to_expiry_ms: token.time_to_expiry_ms(),
        }
    });
    OAuthSessionStatus {
        provider_id: provider_id.to_string(),
        status: session.state,
        token_status,
        last_activity: session.last_activity,
        error: session.error.clone(),
    }
}
