//! Gateway access-token handling
//!
//! [`CredentialCache`] is shared by every outbound call. Reads go through an
//! `RwLock`; logins are serialised by a separate mutex so concurrent callers
//! that find the token stale trigger a single login and all observe its result.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::client::{handle_error_response, request_error};
use super::models::{ApiError, LoginResponse};
use crate::utils::encryption::SecretCipher;
use crate::utils::errors::{AppError, AppResult};
use crate::utils::ratelimit::rate_limit_gateway_api;

/// Shortest pause between two renewal attempts
const MIN_RENEWAL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayCredential {
    pub token_type: String,
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub issued_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for GatewayCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayCredential")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl GatewayCredential {
    pub fn from_login(response: LoginResponse, now: DateTime<Utc>) -> Self {
        Self {
            token_type: response.token_type,
            access_token: response.access_token,
            expires_at: now + ChronoDuration::seconds(response.expires_in),
            issued_at: Some(now),
        }
    }

    /// Value of the `Authorization` header
    pub fn authorization_value(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }

    pub fn expires_within(&self, margin: ChronoDuration, now: DateTime<Utc>) -> bool {
        now + margin >= self.expires_at
    }

    /// `margin`, capped at half of the token lifetime
    pub fn renewal_margin(&self, margin: ChronoDuration) -> ChronoDuration {
        match self.issued_at {
            Some(issued_at) => margin.min((self.expires_at - issued_at) / 2),
            None => margin,
        }
    }
}

/// Durable home of the last credential obtained by login
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self) -> AppResult<Option<GatewayCredential>>;

    async fn save(&self, credential: &GatewayCredential) -> AppResult<()>;
}

/// JSON file store, optionally AES-256-GCM encrypted.
///
/// Writes go to a sibling temp file that is then renamed over the target.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    cipher: Option<SecretCipher>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>, cipher: Option<SecretCipher>) -> Self {
        Self {
            path: path.into(),
            cipher,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn decode(&self, contents: &str) -> AppResult<GatewayCredential> {
        let json = match &self.cipher {
            Some(cipher) => cipher.decrypt(contents.trim())?,
            None => contents.to_string(),
        };

        serde_json::from_str(&json)
            .map_err(|e| AppError::Credential(format!("Malformed credential file: {}", e)))
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> AppResult<Option<GatewayCredential>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AppError::Credential(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        // An unreadable file only forces a new login
        match self.decode(&contents) {
            Ok(credential) => Ok(Some(credential)),
            Err(e) => {
                warn!("Ignoring credential file {}: {}", self.path.display(), e);
                Ok(None)
            }
        }
    }

    async fn save(&self, credential: &GatewayCredential) -> AppResult<()> {
        let json = serde_json::to_string(credential)
            .map_err(|e| AppError::Internal(format!("Failed to serialize credential: {}", e)))?;

        let contents = match &self.cipher {
            Some(cipher) => cipher.encrypt(&json)?,
            None => json,
        };

        let temp_path = self.temp_path();
        tokio::fs::write(&temp_path, contents).await.map_err(|e| {
            AppError::Credential(format!("Failed to write {}: {}", temp_path.display(), e))
        })?;
        tokio::fs::rename(&temp_path, &self.path).await.map_err(|e| {
            AppError::Credential(format!("Failed to replace {}: {}", self.path.display(), e))
        })?;

        debug!("Gateway credential saved to {}", self.path.display());
        Ok(())
    }
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credential: Mutex<Option<GatewayCredential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: GatewayCredential) -> Self {
        Self {
            credential: Mutex::new(Some(credential)),
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> AppResult<Option<GatewayCredential>> {
        Ok(self.credential.lock().await.clone())
    }

    async fn save(&self, credential: &GatewayCredential) -> AppResult<()> {
        *self.credential.lock().await = Some(credential.clone());
        Ok(())
    }
}

/// OAuth2 client-credentials login
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn login(&self) -> Result<LoginResponse, ApiError>;
}

pub struct GetnetAuthenticator {
    http_client: HttpClient,
    base_url: String,
    client_id: String,
    client_secret: String,
}

impl GetnetAuthenticator {
    pub fn new(
        base_url: String,
        client_id: String,
        client_secret: String,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let http_client = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::RequestError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id,
            client_secret,
        })
    }
}

#[async_trait]
impl Authenticator for GetnetAuthenticator {
    /// POST /auth/oauth/v2/token
    async fn login(&self) -> Result<LoginResponse, ApiError> {
        rate_limit_gateway_api().await;

        let url = format!("{}/auth/oauth/v2/token", self.base_url);
        let response = self
            .http_client
            .post(&url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("scope", "oob"), ("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(request_error)?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(handle_error_response(status, response).await);
        }

        response
            .json::<LoginResponse>()
            .await
            .map_err(|e| ApiError::DeserializationError(format!("Failed to parse response: {}", e)))
    }
}

pub struct CredentialCache {
    authenticator: Arc<dyn Authenticator>,
    store: Arc<dyn CredentialStore>,
    current: RwLock<Option<GatewayCredential>>,
    refresh_lock: Mutex<()>,
    refresh_margin: ChronoDuration,
}

impl CredentialCache {
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        store: Arc<dyn CredentialStore>,
        refresh_margin: Duration,
    ) -> Self {
        Self {
            authenticator,
            store,
            current: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            refresh_margin: ChronoDuration::seconds(refresh_margin.as_secs() as i64),
        }
    }

    fn usable(&self, credential: Option<GatewayCredential>) -> Option<GatewayCredential> {
        credential.filter(|c| !c.expires_within(c.renewal_margin(self.refresh_margin), Utc::now()))
    }

    /// A credential that is not about to expire, logging in when needed
    pub async fn credential(&self) -> AppResult<GatewayCredential> {
        let cached = self.current.read().await.clone();
        if let Some(credential) = self.usable(cached) {
            return Ok(credential);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have logged in while we waited
        let cached = self.current.read().await.clone();
        if let Some(credential) = self.usable(cached) {
            return Ok(credential);
        }

        if let Some(stored) = self.usable(self.store.load().await?) {
            debug!(expires_at = %stored.expires_at, "Using stored gateway credential");
            *self.current.write().await = Some(stored.clone());
            return Ok(stored);
        }

        self.login().await
    }

    /// Replace a credential the gateway rejected.
    ///
    /// If the cache already holds a different usable token, that one is returned.
    pub async fn force_refresh(&self, rejected: &GatewayCredential) -> AppResult<GatewayCredential> {
        let _guard = self.refresh_lock.lock().await;

        let cached = self.current.read().await.clone();
        if let Some(credential) = self.usable(cached) {
            if credential.access_token != rejected.access_token {
                return Ok(credential);
            }
        }

        self.login().await
    }

    /// Caller must hold `refresh_lock`
    async fn login(&self) -> AppResult<GatewayCredential> {
        let response = self.authenticator.login().await.map_err(|e| {
            warn!("Gateway login failed: {}", e);
            AppError::Credential(format!("Gateway login failed: {}", e))
        })?;

        let credential = GatewayCredential::from_login(response, Utc::now());

        if let Err(e) = self.store.save(&credential).await {
            warn!("Failed to persist gateway credential: {}", e);
        }

        *self.current.write().await = Some(credential.clone());
        info!(expires_at = %credential.expires_at, "Gateway credential refreshed");

        Ok(credential)
    }

    pub async fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.current.read().await.as_ref().map(|c| c.expires_at)
    }

    /// Time left before the current credential enters the refresh margin
    pub async fn time_until_renewal(&self) -> Duration {
        match self.current.read().await.as_ref() {
            Some(credential) => (credential.expires_at - credential.renewal_margin(self.refresh_margin) - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO),
            None => Duration::ZERO,
        }
    }
}

/// Keep the credential fresh in the background through the same single-flight path
pub fn spawn_renewal(cache: Arc<CredentialCache>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut first = true;
        loop {
            let mut wait = cache.time_until_renewal().await;
            if !first {
                wait = wait.max(MIN_RENEWAL_INTERVAL);
            }
            first = false;

            tokio::time::sleep(wait).await;

            match cache.credential().await {
                Ok(credential) => {
                    debug!(expires_at = %credential.expires_at, "Gateway credential renewal check done")
                }
                Err(e) => warn!("Gateway credential renewal failed: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const KEY_HEX: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    fn login_response(token: &str) -> LoginResponse {
        LoginResponse {
            access_token: token.to_string(),
            token_type: "Bearer".to_string(),
            expires_in: 3600,
            scope: Some("oob".to_string()),
        }
    }

    fn credential(token: &str, expires_in_secs: i64) -> GatewayCredential {
        GatewayCredential {
            token_type: "Bearer".to_string(),
            access_token: token.to_string(),
            expires_at: Utc::now() + ChronoDuration::seconds(expires_in_secs),
            issued_at: None,
        }
    }

    /// Slow login that counts calls and hands out numbered tokens
    struct CountingAuthenticator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Authenticator for CountingAuthenticator {
        async fn login(&self) -> Result<LoginResponse, ApiError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(login_response(&format!("token-{}", n)))
        }
    }

    fn cache_with(
        authenticator: Arc<dyn Authenticator>,
        store: Arc<dyn CredentialStore>,
    ) -> CredentialCache {
        CredentialCache::new(authenticator, store, Duration::from_secs(300))
    }

    #[tokio::test]
    async fn test_concurrent_refresh_logs_in_once() {
        let authenticator = Arc::new(CountingAuthenticator {
            calls: AtomicUsize::new(0),
        });
        let store = Arc::new(MemoryCredentialStore::with_credential(credential("expired", -10)));
        let cache = Arc::new(cache_with(authenticator.clone(), store.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.credential().await })
            })
            .collect();

        let mut tokens = Vec::new();
        for handle in handles {
            tokens.push(handle.await.unwrap().unwrap().access_token);
        }

        assert_eq!(authenticator.calls.load(Ordering::SeqCst), 1);
        assert!(tokens.iter().all(|t| t == "token-1"));
        assert_eq!(store.load().await.unwrap().unwrap().access_token, "token-1");
    }

    #[tokio::test]
    async fn test_uses_stored_credential_without_login() {
        let mut authenticator = MockAuthenticator::new();
        authenticator.expect_login().never();

        let store = Arc::new(MemoryCredentialStore::with_credential(credential("stored", 3600)));
        let cache = cache_with(Arc::new(authenticator), store);

        let credential = cache.credential().await.unwrap();
        assert_eq!(credential.access_token, "stored");
        assert_eq!(credential.authorization_value(), "Bearer stored");
    }

    #[tokio::test]
    async fn test_credential_inside_margin_is_refreshed() {
        let mut authenticator = MockAuthenticator::new();
        authenticator
            .expect_login()
            .times(1)
            .returning(|| Ok(login_response("fresh")));

        // Expires in 60s, margin is 300s
        let store = Arc::new(MemoryCredentialStore::with_credential(credential("old", 60)));
        let cache = cache_with(Arc::new(authenticator), store);

        assert_eq!(cache.credential().await.unwrap().access_token, "fresh");
        // Cached now
        assert_eq!(cache.credential().await.unwrap().access_token, "fresh");
    }

    #[tokio::test]
    async fn test_login_failure_is_credential_error() {
        let mut authenticator = MockAuthenticator::new();
        authenticator
            .expect_login()
            .returning(|| Err(ApiError::Unauthorized("invalid_client".to_string())));

        let cache = cache_with(Arc::new(authenticator), Arc::new(MemoryCredentialStore::new()));

        let err = cache.credential().await.unwrap_err();
        assert!(matches!(err, AppError::Credential(_)));
    }

    #[tokio::test]
    async fn test_force_refresh_is_single_flight() {
        let authenticator = Arc::new(CountingAuthenticator {
            calls: AtomicUsize::new(0),
        });
        let cache = cache_with(authenticator.clone(), Arc::new(MemoryCredentialStore::new()));

        let first = cache.credential().await.unwrap();
        assert_eq!(first.access_token, "token-1");

        let second = cache.force_refresh(&first).await.unwrap();
        assert_eq!(second.access_token, "token-2");

        // A late caller still holding the first token gets the replacement
        let third = cache.force_refresh(&first).await.unwrap();
        assert_eq!(third.access_token, "token-2");
        assert_eq!(authenticator.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_time_until_renewal() {
        let mut authenticator = MockAuthenticator::new();
        authenticator
            .expect_login()
            .times(1)
            .returning(|| Ok(login_response("fresh")));
        let cache = cache_with(Arc::new(authenticator), Arc::new(MemoryCredentialStore::new()));

        assert_eq!(cache.time_until_renewal().await, Duration::ZERO);

        cache.credential().await.unwrap();
        let wait = cache.time_until_renewal().await;
        // 3600s token, 300s margin
        assert!(wait > Duration::from_secs(3200) && wait <= Duration::from_secs(3300));
        assert!(cache.expires_at().await.is_some());
    }

    #[tokio::test]
    async fn test_short_lived_token_is_not_renewed_on_every_call() {
        let mut authenticator = MockAuthenticator::new();
        authenticator.expect_login().times(1).returning(|| {
            Ok(LoginResponse {
                expires_in: 120,
                ..login_response("short")
            })
        });
        let cache = cache_with(Arc::new(authenticator), Arc::new(MemoryCredentialStore::new()));

        // 120s lifetime is below the 300s margin
        for _ in 0..3 {
            assert_eq!(cache.credential().await.unwrap().access_token, "short");
        }

        let wait = cache.time_until_renewal().await;
        assert!(wait > Duration::from_secs(50) && wait <= Duration::from_secs(60));
    }

    #[test]
    fn test_renewal_margin_is_capped_by_lifetime() {
        let now = Utc::now();
        let short = GatewayCredential::from_login(
            LoginResponse {
                expires_in: 120,
                ..login_response("a")
            },
            now,
        );
        assert_eq!(short.renewal_margin(ChronoDuration::seconds(300)), ChronoDuration::seconds(60));

        let long = GatewayCredential::from_login(login_response("b"), now);
        assert_eq!(long.renewal_margin(ChronoDuration::seconds(300)), ChronoDuration::seconds(300));

        // Credentials persisted without an issue time keep the configured margin
        assert_eq!(
            credential("c", 60).renewal_margin(ChronoDuration::seconds(300)),
            ChronoDuration::seconds(300)
        );
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("credential.json"), None);

        assert!(store.load().await.unwrap().is_none());

        let saved = credential("plain", 3600);
        store.save(&saved).await.unwrap();

        assert_eq!(store.load().await.unwrap().unwrap(), saved);
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn test_file_store_encrypted_at_rest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credential.json");
        let cipher = SecretCipher::from_hex(KEY_HEX).unwrap();
        let store = FileCredentialStore::new(&path, Some(cipher));

        let saved = credential("very-secret-token", 3600);
        store.save(&saved).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("very-secret-token"));
        assert_eq!(store.load().await.unwrap().unwrap(), saved);

        // Plain reader cannot use it and falls back to a new login
        let plain = FileCredentialStore::new(&path, None);
        assert!(plain.load().await.unwrap().is_none());
    }

    #[test]
    fn test_debug_hides_token() {
        let printed = format!("{:?}", credential("very-secret-token", 10));
        assert!(!printed.contains("very-secret-token"));
    }
}
