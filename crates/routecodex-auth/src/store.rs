use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use routecodex_common::BaseDirs;

use crate::error::AuthError;
use crate::now_ms;

pub const DEFAULT_EXPIRY_BUFFER_MS: u64 = 60_000;

/// Persisted OAuth credential for one provider + alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenStorage {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Absolute expiry, unix milliseconds. Always computed locally as
    /// `now + expires_in * 1000` when the token is written.
    pub expires_at: u64,
    /// iFlow couples a plain API key to the OAuth identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Antigravity scopes tokens to a project.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub updated_at: u64,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenStorage {
    /// Expired iff `now + buffer >= expires_at`.
    pub fn is_expired(&self, buffer_ms: u64) -> bool {
        now_ms() + buffer_ms >= self.expires_at
    }

    pub fn time_to_expiry_ms(&self) -> i64 {
        self.expires_at as i64 - now_ms() as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenFileStat {
    pub mtime_ms: u64,
}

/// Durable token storage: one JSON file per provider + alias under
/// `<base>/auth/`. Writes land in a fresh file then rename over so a reader
/// never sees a torn write.
#[derive(Debug, Clone)]
pub struct TokenStore {
    auth_dir: PathBuf,
}

impl TokenStore {
    pub fn new(dirs: &BaseDirs) -> Self {
        Self {
            auth_dir: dirs.auth_dir(),
        }
    }

    pub fn with_dir(auth_dir: impl Into<PathBuf>) -> Self {
        Self {
            auth_dir: auth_dir.into(),
        }
    }

    pub fn token_path(&self, provider: &str, alias: &str) -> PathBuf {
        self.auth_dir.join(format!("{provider}-{alias}.json"))
    }

    /// Missing file and unparseable file both yield `None`; only real I/O
    /// trouble is an error.
    pub async fn load(&self, provider: &str, alias: &str) -> Result<Option<TokenStorage>, AuthError> {
        let path = self.token_path(provider, alias);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let value: Value = match serde_json::from_slice(&raw) {
            Ok(value) => value,
            Err(err) => {
                warn!(path = %path.display(), %err, "token file is not valid JSON; treating as missing");
                return Ok(None);
            }
        };
        Ok(adapt_token_document(value))
    }

    pub async fn save(
        &self,
        provider: &str,
        alias: &str,
        token: &TokenStorage,
    ) -> Result<(), AuthError> {
        tokio::fs::create_dir_all(&self.auth_dir).await?;
        let path = self.token_path(provider, alias);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(token)?;
        tokio::fs::write(&tmp, &body).await?;
        set_owner_only(&tmp).await;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    pub async fn delete(&self, provider: &str, alias: &str) -> Result<(), AuthError> {
        let path = self.token_path(provider, alias);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn stat(&self, provider: &str, alias: &str) -> Result<Option<TokenFileStat>, AuthError> {
        let path = self.token_path(provider, alias);
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let mtime_ms = meta
            .modified()
            .ok()
            .and_then(|mtime| mtime.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0);
        Ok(Some(TokenFileStat { mtime_ms }))
    }
}

#[cfg(unix)]
async fn set_owner_only(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o600);
    let _ = tokio::fs::set_permissions(path, perms).await;
}

#[cfg(not(unix))]
async fn set_owner_only(_path: &Path) {}

/// Adapt a raw token document: legacy `expiry_date` files, redacted values.
fn adapt_token_document(mut value: Value) -> Option<TokenStorage> {
    let map = value.as_object_mut()?;

    // Legacy files carry `expiry_date` instead of `expires_at`.
    if !map.contains_key("expires_at")
        && let Some(expiry) = map.remove("expiry_date")
    {
        map.insert("expires_at".to_string(), expiry);
    }

    for field in ["refresh_token", "scope", "api_key", "project_id"] {
        if map
            .get(field)
            .and_then(Value::as_str)
            .is_some_and(is_redacted)
        {
            map.remove(field);
        }
    }

    let access_token = map.get("access_token").and_then(Value::as_str)?;
    if access_token.is_empty() || is_redacted(access_token) {
        return None;
    }

    serde_json::from_value(value).ok()
}

fn is_redacted(value: &str) -> bool {
    value.contains('*') || value.contains("REDACTED")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_store(tag: &str) -> TokenStore {
        let dir = std::env::temp_dir().join(format!("routecodex-auth-test-{tag}-{}", std::process::id()));
        TokenStore::with_dir(dir)
    }

    fn sample_token() -> TokenStorage {
        TokenStorage {
            access_token: "at-1".to_string(),
            refresh_token: Some("rt-1".to_string()),
            token_type: "Bearer".to_string(),
            scope: Some("openid".to_string()),
            expires_at: now_ms() + 3_600_000,
            api_key: None,
            project_id: None,
            created_at: now_ms(),
            updated_at: now_ms(),
        }
    }

    #[tokio::test]
    async fn save_load_round_trip() {
        let store = temp_store("roundtrip");
        let token = sample_token();
        store.save("qwen", "default", &token).await.unwrap();
        let loaded = store.load("qwen", "default").await.unwrap().unwrap();
        assert_eq!(loaded, token);
        store.delete("qwen", "default").await.unwrap();
        assert!(store.load("qwen", "default").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_file_is_none_not_error() {
        let store = temp_store("missing");
        assert!(store.load("nope", "default").await.unwrap().is_none());
        assert!(store.stat("nope", "default").await.unwrap().is_none());
        // Deleting a missing file is fine too.
        store.delete("nope", "default").await.unwrap();
    }

    #[tokio::test]
    async fn corrupt_json_is_treated_as_missing() {
        let store = temp_store("corrupt");
        tokio::fs::create_dir_all(store.token_path("x", "y").parent().unwrap())
            .await
            .unwrap();
        tokio::fs::write(store.token_path("glm", "default"), b"{not json")
            .await
            .unwrap();
        assert!(store.load("glm", "default").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stat_reports_mtime() {
        let store = temp_store("stat");
        store.save("iflow", "default", &sample_token()).await.unwrap();
        let stat = store.stat("iflow", "default").await.unwrap().unwrap();
        assert!(stat.mtime_ms > 0);
    }

    #[test]
    fn legacy_expiry_date_is_adapted() {
        let token = adapt_token_document(json!({
            "access_token": "at",
            "refresh_token": "rt",
            "expiry_date": 1_700_000_000_000u64,
        }))
        .unwrap();
        assert_eq!(token.expires_at, 1_700_000_000_000);
        assert_eq!(token.token_type, "Bearer");
    }

    #[test]
    fn redacted_fields_are_dropped() {
        let token = adapt_token_document(json!({
            "access_token": "at",
            "refresh_token": "rt-****",
            "api_key": "REDACTED",
            "expires_at": 1u64,
        }))
        .unwrap();
        assert!(token.refresh_token.is_none());
        assert!(token.api_key.is_none());
    }

    #[test]
    fn redacted_access_token_means_missing() {
        assert!(adapt_token_document(json!({
            "access_token": "sk-****",
            "expires_at": 1u64,
        }))
        .is_none());
    }

    #[test]
    fn expiry_uses_buffer() {
        let mut token = sample_token();
        token.expires_at = now_ms() + 30_000;
        assert!(token.is_expired(DEFAULT_EXPIRY_BUFFER_MS));
        assert!(!token.is_expired(0));
        token.expires_at = now_ms().saturating_sub(1);
        assert!(token.is_expired(0));
    }
}
