//! Session-credential lifecycle for the upstream marketplace.
//!
//! The broker caches the token in memory and on disk; a refresh is performed
//! lazily on demand, with at most one in-flight login per process.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::{PharmaOpsError, Result};
use crate::upstream::envelope::{Envelope, LoginData};

/// Tokens are considered stale this long before their actual expiry so an
/// in-flight request never crosses the boundary mid-call.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// On-disk cache record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub obtained_at: DateTime<Utc>,
}

impl CachedToken {
    pub fn is_expired(&self) -> bool {
        Utc::now() + Duration::seconds(EXPIRY_MARGIN_SECS) >= self.expires_at
    }
}

/// The login exchange against the upstream. Factored out as a trait so the
/// broker can be exercised with a stub.
#[async_trait]
pub trait LoginExchange: Send + Sync {
    async fn login(&self) -> Result<CachedToken>;
}

/// Real login exchange: POST /api/user/login with operator credentials.
pub struct HttpLoginExchange {
    http: reqwest::Client,
    base_url: url::Url,
    username: String,
    password: String,
}

impl HttpLoginExchange {
    pub fn new(
        http: reqwest::Client,
        base_url: url::Url,
        username: String,
        password: String,
    ) -> Self {
        Self {
            http,
            base_url,
            username,
            password,
        }
    }
}

#[async_trait]
impl LoginExchange for HttpLoginExchange {
    async fn login(&self) -> Result<CachedToken> {
        let url = self
            .base_url
            .join("/api/user/login")
            .map_err(|e| PharmaOpsError::config(format!("bad upstream base URL: {e}")))?;

        let response = self
            .http
            .post(url)
            .json(&serde_json::json!({
                "username": self.username,
                "password": self.password,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PharmaOpsError::auth(format!(
                "login rejected with HTTP {status}"
            )));
        }

        let envelope: Envelope<LoginData> = response.json().await?;
        if envelope.code != 0 {
            return Err(PharmaOpsError::auth(format!(
                "login rejected: {}",
                envelope.message
            )));
        }
        let data = envelope
            .data
            .ok_or_else(|| PharmaOpsError::auth("login succeeded with no token payload"))?;

        let now = Utc::now();
        Ok(CachedToken {
            token: data.token,
            expires_at: now + Duration::seconds(data.expires_in),
            obtained_at: now,
        })
    }
}

/// Supplies a valid session token on demand (C1).
pub struct CredentialBroker {
    exchange: Arc<dyn LoginExchange>,
    cache_path: PathBuf,
    /// Held across the whole refresh so concurrent callers await the
    /// in-flight login instead of starting their own.
    state: Mutex<Option<CachedToken>>,
}

impl CredentialBroker {
    pub fn new(exchange: Arc<dyn LoginExchange>, cache_path: PathBuf) -> Self {
        Self {
            exchange,
            cache_path,
            state: Mutex::new(None),
        }
    }

    /// Return a valid token, refreshing if the cached one is missing or
    /// expired. Fails with `AuthError` when the upstream rejects the login.
    pub async fn get(&self) -> Result<CachedToken> {
        let mut state = self.state.lock().await;

        if let Some(token) = state.as_ref() {
            if !token.is_expired() {
                return Ok(token.clone());
            }
        }

        // Memory miss: try the disk cache before paying for a login.
        if state.is_none() {
            if let Some(token) = self.load_cache() {
                if !token.is_expired() {
                    debug!("using token from disk cache");
                    *state = Some(token.clone());
                    return Ok(token);
                }
            }
        }

        info!("refreshing upstream session token");
        let token = self.exchange.login().await?;
        self.store_cache(&token)?;
        *state = Some(token.clone());
        Ok(token)
    }

    /// Force a refresh on the next `get()`. Invoked on 401/403 responses or
    /// a recognized token-expired envelope.
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        *state = None;
        if self.cache_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.cache_path) {
                warn!("failed to drop token cache file: {}", e);
            }
        }
    }

    fn load_cache(&self) -> Option<CachedToken> {
        let contents = std::fs::read_to_string(&self.cache_path).ok()?;
        match serde_json::from_str(&contents) {
            Ok(token) => Some(token),
            Err(e) => {
                warn!("ignoring unreadable token cache: {}", e);
                None
            }
        }
    }

    /// Persist via write-to-temp + atomic rename.
    fn store_cache(&self, token: &CachedToken) -> Result<()> {
        if let Some(parent) = self.cache_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = temp_path(&self.cache_path);
        std::fs::write(&tmp, serde_json::to_vec_pretty(token)?)?;
        std::fs::rename(&tmp, &self.cache_path)?;
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubExchange {
        logins: AtomicUsize,
        ttl_secs: i64,
    }

    #[async_trait]
    impl LoginExchange for StubExchange {
        async fn login(&self) -> Result<CachedToken> {
            let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
            let now = Utc::now();
            Ok(CachedToken {
                token: format!("token-{n}"),
                expires_at: now + Duration::seconds(self.ttl_secs),
                obtained_at: now,
            })
        }
    }

    fn broker(ttl_secs: i64) -> (CredentialBroker, Arc<StubExchange>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let exchange = Arc::new(StubExchange {
            logins: AtomicUsize::new(0),
            ttl_secs,
        });
        let broker = CredentialBroker::new(exchange.clone(), dir.path().join("token.json"));
        (broker, exchange, dir)
    }

    #[tokio::test]
    async fn test_token_cached_between_calls() {
        let (broker, exchange, _dir) = broker(3600);

        let first = broker.get().await.unwrap();
        let second = broker.get().await.unwrap();

        assert_eq!(first.token, second.token);
        assert_eq!(exchange.logins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let (broker, exchange, _dir) = broker(3600);

        let first = broker.get().await.unwrap();
        broker.invalidate().await;
        let second = broker.get().await.unwrap();

        assert_ne!(first.token, second.token);
        assert_eq!(exchange.logins.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed() {
        // TTL below the expiry margin: every get() refreshes.
        let (broker, exchange, _dir) = broker(10);

        broker.get().await.unwrap();
        broker.get().await.unwrap();

        assert_eq!(exchange.logins.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_disk_cache_survives_new_broker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");

        let exchange = Arc::new(StubExchange {
            logins: AtomicUsize::new(0),
            ttl_secs: 3600,
        });
        let broker_a = CredentialBroker::new(exchange.clone(), path.clone());
        let token = broker_a.get().await.unwrap();

        // A fresh broker process picks the token up from disk.
        let broker_b = CredentialBroker::new(exchange.clone(), path);
        let reloaded = broker_b.get().await.unwrap();

        assert_eq!(token.token, reloaded.token);
        assert_eq!(exchange.logins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_gets_single_flight() {
        let (broker, exchange, _dir) = broker(3600);
        let broker = Arc::new(broker);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let broker = broker.clone();
            handles.push(tokio::spawn(async move { broker.get().await.unwrap() }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(exchange.logins.load(Ordering::SeqCst), 1);
    }
}
