use routecodex_common::{ErrorCode, GatewayError};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
    #[error("device authorization expired before completion")]
    Timeout,
    #[error("device authorization denied by the user")]
    AccessDenied,
    #[error("oauth endpoint returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("provider {0} has no usable credential")]
    NotAuthenticated(String),
    #[error("unknown provider {0}")]
    UnknownProvider(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Other(String),
}

impl AuthError {
    pub fn into_gateway_error(self) -> GatewayError {
        match self {
            AuthError::Timeout => GatewayError::new(ErrorCode::OauthTimeout, self.to_string()),
            AuthError::Http { status, ref body } => {
                GatewayError::upstream_http(status, body.clone())
            }
            other => GatewayError::new(ErrorCode::TokenRefreshFailed, other.to_string()),
        }
    }
}
