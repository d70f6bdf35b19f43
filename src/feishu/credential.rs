//! Persisted Feishu credentials and the two ways of turning them into a bearer token.
//!
//! User credentials move through a small state machine:
//!
//! ```text
//! Unconfigured ──(app id/secret written)──▶ AwaitingUserAuth
//! AwaitingUserAuth ──(code exchanged)──▶ Authorized
//! Authorized ──(now ≥ expiry − 5 min)──▶ Expired
//! Expired ──(refresh ok)──▶ Authorized
//! Expired ──(refresh rejected / no refresh token)──▶ AwaitingUserAuth
//! ```
//!
//! Tenant mode skips all of that and asks for an application token every time
//! the cached one runs out.

use super::client::{FeishuClient, UserTokenGrant};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Tokens are treated as expired this long before their stated expiry.
pub const EXPIRY_MARGIN_SECS: i64 = 300;

const PLACEHOLDER_APP_ID: &str = "YOUR_APP_ID";
const PLACEHOLDER_APP_SECRET: &str = "YOUR_APP_SECRET";

// ── Stored credentials ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeishuCredentials {
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub app_secret: String,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub folder_token: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub user_access_token: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub refresh_token: Option<String>,
    /// Unix seconds.
    #[serde(default, deserialize_with = "unix_seconds")]
    pub token_expires_at: Option<i64>,
    #[serde(default)]
    pub use_tenant_token: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<Value>,
}

fn blank_as_none<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<String>, D::Error> {
    let value: Option<String> = Option::deserialize(d)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

// Older files store a float timestamp, or 0 for "never".
fn unix_seconds<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<i64>, D::Error> {
    let value: Option<Value> = Option::deserialize(d)?;
    Ok(value
        .as_ref()
        .and_then(Value::as_f64)
        .map(|f| f as i64)
        .filter(|&secs| secs > 0))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    Unconfigured,
    AwaitingUserAuth,
    Authorized { expires_at: DateTime<Utc> },
    Expired { refreshable: bool },
}

impl FeishuCredentials {
    /// Skeleton written by `feishu-auth --init`.
    pub fn template() -> Self {
        Self {
            app_id: PLACEHOLDER_APP_ID.to_string(),
            app_secret: PLACEHOLDER_APP_SECRET.to_string(),
            instructions: Some(json!({
                "1": "Create a self-built app at https://open.feishu.cn/app",
                "2": "Copy its App ID and App Secret into this file",
                "3": "Grant drive:drive and sheets:spreadsheet permissions",
                "4": "Add http://localhost:9000/callback as a redirect URL",
                "5": "Run `feishu-auth --auth` (user token) or `feishu-auth --simple` (tenant token)",
                "6": "Optionally set folder_token to the target folder",
            })),
            ..Self::default()
        }
    }

    pub fn is_configured(&self) -> bool {
        let filled = |v: &str, placeholder: &str| !v.trim().is_empty() && v != placeholder;
        filled(&self.app_id, PLACEHOLDER_APP_ID) && filled(&self.app_secret, PLACEHOLDER_APP_SECRET)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.token_expires_at
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
    }

    pub fn state(&self, now: DateTime<Utc>) -> CredentialState {
        if !self.is_configured() {
            return CredentialState::Unconfigured;
        }
        if self.user_access_token.is_none() {
            return CredentialState::AwaitingUserAuth;
        }
        match self.expires_at() {
            Some(expires_at) if now < expires_at - Duration::seconds(EXPIRY_MARGIN_SECS) => {
                CredentialState::Authorized { expires_at }
            }
            _ => CredentialState::Expired {
                refreshable: self.refresh_token.is_some(),
            },
        }
    }

    pub fn record_user_grant(&mut self, grant: UserTokenGrant, now: DateTime<Utc>) {
        self.user_access_token = Some(grant.access_token);
        // Feishu only rotates the refresh token sometimes
        if let Some(refresh) = grant.refresh_token.filter(|r| !r.is_empty()) {
            self.refresh_token = Some(refresh);
        }
        if grant.name.is_some() {
            self.user_name = grant.name;
        }
        self.token_expires_at = Some(now.timestamp() + grant.expires_in);
        self.use_tenant_token = false;
        self.updated_at = Some(now);
    }

    pub fn clear_user_tokens(&mut self) {
        self.user_access_token = None;
        self.refresh_token = None;
        self.token_expires_at = None;
    }
}

// ── Store ────────────────────────────────────────────────────────────────────

pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<FeishuCredentials>;
    fn save(&self, creds: &FeishuCredentials) -> Result<()>;
}

/// Pretty-printed JSON file, by default `feishu_config.json` in the working directory.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the template unless a file is already there. Returns whether it wrote.
    pub fn create_template(&self) -> Result<bool> {
        if self.path.exists() {
            return Ok(false);
        }
        self.save(&FeishuCredentials::template())?;
        Ok(true)
    }
}

impl CredentialStore for JsonFileStore {
    /// A missing file reads as unconfigured.
    fn load(&self) -> Result<FeishuCredentials> {
        if !self.path.exists() {
            return Ok(FeishuCredentials::default());
        }
        let text = fs::read_to_string(&self.path).map_err(|e| AppError::io(&self.path, e))?;
        serde_json::from_str(&text)
            .map_err(|e| AppError::Config(format!("{} is not valid: {}", self.path.display(), e)))
    }

    fn save(&self, creds: &FeishuCredentials) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| AppError::io(parent, e))?;
        }
        let text = serde_json::to_string_pretty(creds)
            .map_err(|e| AppError::Config(format!("cannot serialize credentials: {}", e)))?;
        fs::write(&self.path, text).map_err(|e| AppError::io(&self.path, e))
    }
}

// ── Token providers ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Tenant,
    User,
}

#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// A bearer token valid for at least the next few minutes.
    async fn bearer_token(&self) -> Result<String>;
    fn mode(&self) -> AuthMode;
}

/// Application token, cached until it nears expiry.
pub struct TenantToken {
    client: FeishuClient,
    app_id: String,
    app_secret: String,
    cached: Mutex<Option<(String, DateTime<Utc>)>>,
}

impl TenantToken {
    pub fn new(client: FeishuClient, creds: &FeishuCredentials) -> Self {
        Self {
            client,
            app_id: creds.app_id.clone(),
            app_secret: creds.app_secret.clone(),
            cached: Mutex::new(None),
        }
    }
}

#[async_trait]
impl TokenProvider for TenantToken {
    async fn bearer_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now();
        if let Some((token, expires_at)) = cached.as_ref() {
            if now < *expires_at - Duration::seconds(EXPIRY_MARGIN_SECS) {
                return Ok(token.clone());
            }
        }

        let issued = self
            .client
            .tenant_access_token(&self.app_id, &self.app_secret)
            .await?;
        *cached = Some((issued.token.clone(), now + Duration::seconds(issued.expires_in)));
        Ok(issued.token)
    }

    fn mode(&self) -> AuthMode {
        AuthMode::Tenant
    }
}

/// User token from the credential store, refreshed and re-persisted on demand.
pub struct UserToken {
    client: FeishuClient,
    store: Arc<dyn CredentialStore>,
    creds: Mutex<FeishuCredentials>,
}

impl UserToken {
    pub fn new(client: FeishuClient, store: Arc<dyn CredentialStore>, creds: FeishuCredentials) -> Self {
        Self {
            client,
            store,
            creds: Mutex::new(creds),
        }
    }
}

#[async_trait]
impl TokenProvider for UserToken {
    async fn bearer_token(&self) -> Result<String> {
        let mut creds = self.creds.lock().await;
        let now = Utc::now();

        match creds.state(now) {
            CredentialState::Unconfigured => {
                Err(AppError::Auth("app_id/app_secret are not configured".into()))
            }
            CredentialState::AwaitingUserAuth => {
                Err(AppError::Auth("no user authorization has been completed".into()))
            }
            CredentialState::Authorized { .. } => creds
                .user_access_token
                .clone()
                .ok_or_else(|| AppError::Auth("user token missing".into())),
            CredentialState::Expired { refreshable: false } => Err(AppError::Auth(
                "user token expired and no refresh token is stored".into(),
            )),
            CredentialState::Expired { refreshable: true } => {
                let refresh = creds.refresh_token.clone().unwrap_or_default();
                info!("User token expired, refreshing");

                match self
                    .client
                    .refresh_user_token(&creds.app_id, &creds.app_secret, &refresh)
                    .await
                {
                    Ok(grant) => {
                        let token = grant.access_token.clone();
                        creds.record_user_grant(grant, now);
                        self.store.save(&creds)?;
                        Ok(token)
                    }
                    Err(e @ AppError::Network { .. }) => Err(e),
                    Err(e) => {
                        warn!("Token refresh rejected, clearing stored user tokens: {}", e);
                        creds.clear_user_tokens();
                        creds.updated_at = Some(now);
                        self.store.save(&creds)?;
                        Err(AppError::Auth(format!("token refresh failed: {}", e)))
                    }
                }
            }
        }
    }

    fn mode(&self) -> AuthMode {
        AuthMode::User
    }
}

/// Picks tenant or user mode from what is stored.
pub fn token_provider(client: FeishuClient, store: Arc<dyn CredentialStore>) -> Result<Box<dyn TokenProvider>> {
    let creds = store.load()?;
    if !creds.is_configured() {
        return Err(AppError::Auth(
            "Feishu app credentials missing; run `feishu-auth --init` and fill in app_id/app_secret".into(),
        ));
    }

    if creds.use_tenant_token {
        Ok(Box::new(TenantToken::new(client, &creds)))
    } else {
        Ok(Box::new(UserToken::new(client, store, creds)))
    }
}

/// Switch to tenant mode after checking the app credentials actually work.
pub async fn enable_tenant_mode(client: &FeishuClient, store: &dyn CredentialStore) -> Result<()> {
    let mut creds = store.load()?;
    if !creds.is_configured() {
        return Err(AppError::Auth("app_id/app_secret are not configured".into()));
    }

    client
        .tenant_access_token(&creds.app_id, &creds.app_secret)
        .await?;

    creds.use_tenant_token = true;
    creds.updated_at = Some(Utc::now());
    store.save(&creds)
}

/// Exchange an authorization code and persist the resulting user tokens.
pub async fn complete_user_auth(
    client: &FeishuClient,
    store: &dyn CredentialStore,
    code: &str,
) -> Result<FeishuCredentials> {
    let mut creds = store.load()?;
    if !creds.is_configured() {
        return Err(AppError::Auth("app_id/app_secret are not configured".into()));
    }

    let grant = client
        .exchange_code(&creds.app_id, &creds.app_secret, code)
        .await?;
    creds.record_user_grant(grant, Utc::now());
    store.save(&creds)?;
    Ok(creds)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::FeishuConfig;
    use axum::routing::post;
    use axum::{Json, Router};

    /// In-memory store counting writes.
    #[derive(Default)]
    pub(crate) struct MemoryStore {
        pub creds: std::sync::Mutex<FeishuCredentials>,
        pub saves: std::sync::Mutex<usize>,
    }

    impl MemoryStore {
        pub fn with(creds: FeishuCredentials) -> Self {
            Self {
                creds: std::sync::Mutex::new(creds),
                saves: std::sync::Mutex::new(0),
            }
        }
    }

    impl CredentialStore for MemoryStore {
        fn load(&self) -> Result<FeishuCredentials> {
            Ok(self.creds.lock().unwrap().clone())
        }

        fn save(&self, creds: &FeishuCredentials) -> Result<()> {
            *self.creds.lock().unwrap() = creds.clone();
            *self.saves.lock().unwrap() += 1;
            Ok(())
        }
    }

    pub(crate) fn configured() -> FeishuCredentials {
        FeishuCredentials {
            app_id: "cli_test".into(),
            app_secret: "secret".into(),
            ..FeishuCredentials::default()
        }
    }

    fn offline_client() -> FeishuClient {
        FeishuClient::new(&FeishuConfig {
            base_url: "http://127.0.0.1:9/open-apis".into(),
            ..FeishuConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_state_transitions() {
        let now = Utc::now();
        assert_eq!(FeishuCredentials::default().state(now), CredentialState::Unconfigured);
        assert_eq!(FeishuCredentials::template().state(now), CredentialState::Unconfigured);

        let mut creds = configured();
        assert_eq!(creds.state(now), CredentialState::AwaitingUserAuth);

        creds.record_user_grant(
            UserTokenGrant {
                access_token: "u-1".into(),
                refresh_token: Some("r-1".into()),
                expires_in: 7200,
                name: None,
            },
            now,
        );
        assert!(matches!(creds.state(now), CredentialState::Authorized { .. }));

        // inside the five-minute margin counts as expired
        let near_expiry = now + Duration::seconds(7200 - EXPIRY_MARGIN_SECS + 1);
        assert_eq!(creds.state(near_expiry), CredentialState::Expired { refreshable: true });

        creds.refresh_token = None;
        assert_eq!(creds.state(near_expiry), CredentialState::Expired { refreshable: false });

        creds.clear_user_tokens();
        assert_eq!(creds.state(now), CredentialState::AwaitingUserAuth);
    }

    #[test]
    fn test_file_store_round_trip_and_legacy_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("feishu_config.json"));

        assert_eq!(store.load().unwrap(), FeishuCredentials::default());
        assert!(store.create_template().unwrap());
        assert!(!store.create_template().unwrap());
        assert!(!store.load().unwrap().is_configured());

        fs::write(
            store.path(),
            r#"{"app_id":"cli_x","app_secret":"s","folder_token":"","user_access_token":"u",
                "refresh_token":"r","token_expires_at":1766563200.25,"use_tenant_token":false}"#,
        )
        .unwrap();
        let creds = store.load().unwrap();
        assert_eq!(creds.folder_token, None);
        assert_eq!(creds.token_expires_at, Some(1766563200));

        store.save(&creds).unwrap();
        assert_eq!(store.load().unwrap(), creds);
    }

    #[test]
    fn test_corrupt_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("feishu_config.json"));
        fs::write(store.path(), "{not json").unwrap();
        assert!(matches!(store.load(), Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn test_user_token_without_refresh_is_auth_error() {
        let mut creds = configured();
        creds.user_access_token = Some("u-old".into());
        creds.token_expires_at = Some(Utc::now().timestamp() - 10);

        let store = Arc::new(MemoryStore::with(creds.clone()));
        let provider = UserToken::new(offline_client(), store.clone(), creds);

        let err = provider.bearer_token().await.unwrap_err();
        assert!(matches!(err, AppError::Auth(_)));
        assert_eq!(*store.saves.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_valid_user_token_needs_no_network() {
        let mut creds = configured();
        creds.user_access_token = Some("u-live".into());
        creds.token_expires_at = Some(Utc::now().timestamp() + 3600);

        let provider = UserToken::new(offline_client(), Arc::new(MemoryStore::default()), creds);
        assert_eq!(provider.bearer_token().await.unwrap(), "u-live");
        assert_eq!(provider.mode(), AuthMode::User);
    }

    async fn auth_server(refresh_ok: bool) -> FeishuClient {
        let router = Router::new()
            .route(
                "/open-apis/auth/v3/app_access_token/internal",
                post(|| async { Json(json!({"code": 0, "app_access_token": "a-1", "expire": 7200})) }),
            )
            .route(
                "/open-apis/authen/v1/oidc/refresh_access_token",
                post(move || async move {
                    if refresh_ok {
                        Json(json!({"code": 0, "data": {
                            "access_token": "u-new", "refresh_token": "r-new", "expires_in": 7200}}))
                    } else {
                        Json(json!({"code": 20026, "msg": "refresh token invalid"}))
                    }
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        FeishuClient::new(&FeishuConfig {
            base_url: format!("http://{}/open-apis", addr),
            ..FeishuConfig::default()
        })
        .unwrap()
    }

    fn expired_with_refresh() -> FeishuCredentials {
        let mut creds = configured();
        creds.user_access_token = Some("u-old".into());
        creds.refresh_token = Some("r-old".into());
        creds.token_expires_at = Some(Utc::now().timestamp() - 10);
        creds
    }

    #[tokio::test]
    async fn test_refresh_persists_new_tokens() {
        let client = auth_server(true).await;
        let store = Arc::new(MemoryStore::with(expired_with_refresh()));
        let provider = UserToken::new(client, store.clone(), expired_with_refresh());

        assert_eq!(provider.bearer_token().await.unwrap(), "u-new");

        let saved = store.load().unwrap();
        assert_eq!(saved.user_access_token.as_deref(), Some("u-new"));
        assert_eq!(saved.refresh_token.as_deref(), Some("r-new"));
        assert!(matches!(saved.state(Utc::now()), CredentialState::Authorized { .. }));
    }

    #[tokio::test]
    async fn test_rejected_refresh_returns_to_awaiting_auth() {
        let client = auth_server(false).await;
        let store = Arc::new(MemoryStore::with(expired_with_refresh()));
        let provider = UserToken::new(client, store.clone(), expired_with_refresh());

        assert!(matches!(provider.bearer_token().await, Err(AppError::Auth(_))));
        assert_eq!(store.load().unwrap().state(Utc::now()), CredentialState::AwaitingUserAuth);
    }

    #[test]
    fn test_provider_selection() {
        let store: Arc<dyn CredentialStore> = Arc::new(MemoryStore::default());
        assert!(matches!(
            token_provider(offline_client(), store),
            Err(AppError::Auth(_))
        ));

        let mut tenant = configured();
        tenant.use_tenant_token = true;
        let store: Arc<dyn CredentialStore> = Arc::new(MemoryStore::with(tenant));
        let provider = token_provider(offline_client(), store).unwrap();
        assert_eq!(provider.mode(), AuthMode::Tenant);
    }
}
