use async_trait::async_trait;

use routecodex_auth::{AuthError, OAuthManager};

/// Request-time credential access for the transport. The OAuth manager is
/// the production implementation; tests inject scripted sources.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn get_token(&self, provider_id: &str) -> Result<String, AuthError>;

    /// Forced refresh for the upstream-401 recovery path.
    async fn refresh_credentials(&self, provider_id: &str) -> Result<String, AuthError>;

    /// Coupled plain API key, when the stored credential carries one (iFlow).
    async fn get_api_key(&self, _provider_id: &str) -> Option<String> {
        None
    }
}

#[async_trait]
impl CredentialSource for OAuthManager {
    async fn get_token(&self, provider_id: &str) -> Result<String, AuthError> {
        OAuthManager::get_token(self, provider_id).await
    }

    async fn refresh_credentials(&self, provider_id: &str) -> Result<String, AuthError> {
        OAuthManager::refresh_credentials(self, provider_id).await
    }

    async fn get_api_key(&self, provider_id: &str) -> Option<String> {
        OAuthManager::stored_api_key(self, provider_id).await
    }
}
