use async_trait::async_trait;
use bytes::Bytes;

use crate::error::AuthError;

/// HTTP boundary for the OAuth endpoints. Injected so flows are testable
/// without a network.
#[async_trait]
pub trait AuthHttp: Send + Sync {
    /// POST an `application/x-www-form-urlencoded` body; returns status + body.
    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<(u16, Bytes), AuthError>;
}

#[derive(Clone)]
pub struct WreqAuthHttp {
    client: wreq::Client,
}

impl WreqAuthHttp {
    pub fn new() -> Result<Self, AuthError> {
        let client = wreq::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(5))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|err| AuthError::Other(err.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AuthHttp for WreqAuthHttp {
    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<(u16, Bytes), AuthError> {
        let body = form
            .iter()
            .map(|(key, value)| format!("{key}={}", urlencoding::encode(value)))
            .collect::<Vec<String>>()
            .join("&");
        let resp = self
            .client
            .post(url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|err| AuthError::Other(err.to_string()))?;
        let status = resp.status().as_u16();
        let bytes = resp
            .bytes()
            .await
            .map_err(|err| AuthError::Other(err.to_string()))?;
        Ok((status, bytes))
    }
}
