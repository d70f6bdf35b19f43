use super::SpreadsheetApi;
use crate::config::FeishuConfig;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Feishu codes meaning "this bearer token is no good".
const TOKEN_ERROR_CODES: [i64; 4] = [99991661, 99991663, 99991668, 99991677];

const LIST_PAGE_SIZE: u32 = 200;

/// Short-lived token handed out by the auth endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub expires_in: i64,
}

/// User access/refresh pair from the OIDC endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserTokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    pub expires_in: i64,
    #[serde(default)]
    pub name: Option<String>,
}

fn default_expires_in() -> i64 {
    7200
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedSpreadsheet {
    pub token: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveFile {
    pub name: String,
    pub kind: String,
    pub token: String,
}

#[derive(Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<FileEntry>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct FileEntry {
    #[serde(default)]
    name: String,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    token: String,
}

// ── Client ────────────────────────────────────────────────────────────────────

/// Thin JSON client over the Feishu open API.
#[derive(Clone)]
pub struct FeishuClient {
    http: reqwest::Client,
    base_url: String,
}

impl FeishuClient {
    pub fn new(config: &FeishuConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Config(format!("failed to build Feishu HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Send a request and unwrap Feishu's `{code, msg, ...}` envelope.
    async fn call(&self, operation: &str, req: RequestBuilder) -> Result<Value> {
        debug!("Feishu {}", operation);
        let resp = req.send().await.map_err(|e| {
            AppError::network(format!("{}: {}", operation, e), e.is_timeout() || e.is_connect())
        })?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| AppError::network(format!("{}: failed to read body: {}", operation, e), true))?;

        let value: Value = match serde_json::from_str(&body) {
            Ok(v) => v,
            Err(_) if status.is_success() => {
                return Err(AppError::Parse(format!("{}: response is not JSON", operation)));
            }
            Err(_) => {
                return Err(AppError::network(
                    format!("{}: HTTP {}", operation, status),
                    status.is_server_error(),
                ));
            }
        };

        let fallback = if status.is_success() { 0 } else { i64::from(status.as_u16()) };
        let code = value.get("code").and_then(Value::as_i64).unwrap_or(fallback);
        if code != 0 {
            let msg = value
                .get("msg")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if TOKEN_ERROR_CODES.contains(&code) {
                return Err(AppError::Auth(format!("{} (code {})", msg, code)));
            }
            return Err(AppError::RemoteApi {
                operation: operation.to_string(),
                code,
                msg,
            });
        }

        Ok(value)
    }

    async fn call_data<T: DeserializeOwned>(&self, operation: &str, req: RequestBuilder) -> Result<T> {
        let mut value = self.call(operation, req).await?;
        let data = value.get_mut("data").map(Value::take).unwrap_or(Value::Null);
        serde_json::from_value(data)
            .map_err(|e| AppError::Parse(format!("{}: unexpected response shape: {}", operation, e)))
    }

    // ── Auth endpoints ───────────────────────────────────────────────────────

    async fn internal_token(&self, kind: &str, app_id: &str, app_secret: &str) -> Result<IssuedToken> {
        let operation = format!("{} request", kind);
        let req = self
            .http
            .post(self.endpoint(&format!("auth/v3/{}/internal", kind)))
            .json(&json!({ "app_id": app_id, "app_secret": app_secret }));

        let value = self.call(&operation, req).await.map_err(into_auth)?;
        let token = value
            .get(kind)
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::Auth(format!("{} missing from response", kind)))?;

        Ok(IssuedToken {
            token: token.to_string(),
            expires_in: value.get("expire").and_then(Value::as_i64).unwrap_or(7200),
        })
    }

    /// Application-level token; no user interaction involved.
    pub async fn tenant_access_token(&self, app_id: &str, app_secret: &str) -> Result<IssuedToken> {
        self.internal_token("tenant_access_token", app_id, app_secret).await
    }

    pub async fn app_access_token(&self, app_id: &str, app_secret: &str) -> Result<IssuedToken> {
        self.internal_token("app_access_token", app_id, app_secret).await
    }

    /// Trade the code from the browser redirect for a user token pair.
    pub async fn exchange_code(&self, app_id: &str, app_secret: &str, code: &str) -> Result<UserTokenGrant> {
        let app = self.app_access_token(app_id, app_secret).await?;
        let req = self
            .http
            .post(self.endpoint("authen/v1/oidc/access_token"))
            .bearer_auth(&app.token)
            .json(&json!({ "grant_type": "authorization_code", "code": code }));
        self.call_data("authorization code exchange", req)
            .await
            .map_err(into_auth)
    }

    pub async fn refresh_user_token(
        &self,
        app_id: &str,
        app_secret: &str,
        refresh_token: &str,
    ) -> Result<UserTokenGrant> {
        let app = self.app_access_token(app_id, app_secret).await?;
        let req = self
            .http
            .post(self.endpoint("authen/v1/oidc/refresh_access_token"))
            .bearer_auth(&app.token)
            .json(&json!({ "grant_type": "refresh_token", "refresh_token": refresh_token }));
        self.call_data("user token refresh", req)
            .await
            .map_err(into_auth)
    }

    // ── Drive ────────────────────────────────────────────────────────────────

    /// Every file in a folder (root when `folder` is `None`).
    pub async fn list_files(&self, token: &str, folder: Option<&str>) -> Result<Vec<DriveFile>> {
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = Url::parse(&self.endpoint("drive/v1/files"))
                .map_err(|e| AppError::Config(format!("invalid Feishu base_url: {}", e)))?;
            {
                let mut pairs = url.query_pairs_mut();
                pairs.append_pair("page_size", &LIST_PAGE_SIZE.to_string());
                if let Some(folder) = folder {
                    pairs.append_pair("folder_token", folder);
                }
                if let Some(page) = &page_token {
                    pairs.append_pair("page_token", page);
                }
            }

            let req = self.http.get(url).bearer_auth(token);
            let page: FileList = self.call_data("drive file listing", req).await?;
            files.extend(page.files.into_iter().map(|f| DriveFile {
                name: f.name,
                kind: f.kind,
                token: f.token,
            }));

            match page.next_page_token.filter(|t| page.has_more && !t.is_empty()) {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        Ok(files)
    }
}

/// Token endpoint rejections are authorization problems, not API errors.
fn into_auth(err: AppError) -> AppError {
    match err {
        AppError::RemoteApi { operation, code, msg } => {
            AppError::Auth(format!("{} failed (code {}): {}", operation, code, msg))
        }
        other => other,
    }
}

#[async_trait]
impl SpreadsheetApi for FeishuClient {
    async fn list_titles(&self, token: &str, folder: Option<&str>) -> Result<Vec<String>> {
        Ok(self
            .list_files(token, folder)
            .await?
            .into_iter()
            .map(|f| f.name)
            .collect())
    }

    async fn create_spreadsheet(
        &self,
        token: &str,
        title: &str,
        folder: Option<&str>,
    ) -> Result<CreatedSpreadsheet> {
        let mut body = json!({ "title": title });
        if let Some(folder) = folder {
            body["folder_token"] = json!(folder);
        }
        let req = self
            .http
            .post(self.endpoint("sheets/v3/spreadsheets"))
            .bearer_auth(token)
            .json(&body);

        let data: Value = self.call_data("spreadsheet creation", req).await?;
        let sheet = &data["spreadsheet"];
        let sheet_token = sheet["spreadsheet_token"]
            .as_str()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::Parse("spreadsheet creation: no spreadsheet_token".into()))?;

        Ok(CreatedSpreadsheet {
            token: sheet_token.to_string(),
            url: sheet["url"].as_str().filter(|u| !u.is_empty()).map(str::to_string),
        })
    }

    async fn first_sheet_id(&self, token: &str, spreadsheet: &str) -> Result<String> {
        let req = self
            .http
            .get(self.endpoint(&format!("sheets/v3/spreadsheets/{}/sheets/query", spreadsheet)))
            .bearer_auth(token);

        let data: Value = self.call_data("sheet query", req).await?;
        data["sheets"]
            .as_array()
            .and_then(|sheets| sheets.first())
            .and_then(|s| s["sheet_id"].as_str())
            .map(str::to_string)
            .ok_or_else(|| AppError::Parse(format!("spreadsheet {} has no sheets", spreadsheet)))
    }

    async fn write_values(
        &self,
        token: &str,
        spreadsheet: &str,
        range: &str,
        values: Vec<Vec<Value>>,
    ) -> Result<()> {
        let req = self
            .http
            .put(self.endpoint(&format!("sheets/v2/spreadsheets/{}/values", spreadsheet)))
            .bearer_auth(token)
            .json(&json!({ "valueRange": { "range": range, "values": values } }));

        self.call(&format!("value write {}", range), req).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::collections::HashMap;

    async fn serve(router: Router) -> FeishuClient {
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

    #[tokio::test]
    async fn test_tenant_token() {
        let client = serve(Router::new().route(
            "/open-apis/auth/v3/tenant_access_token/internal",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["app_id"], "cli_a");
                Json(json!({"code": 0, "msg": "ok", "tenant_access_token": "t-123", "expire": 7000}))
            }),
        ))
        .await;

        let token = client.tenant_access_token("cli_a", "s").await.unwrap();
        assert_eq!(token, IssuedToken { token: "t-123".into(), expires_in: 7000 });
    }

    #[tokio::test]
    async fn test_bad_app_secret_is_auth_error() {
        let client = serve(Router::new().route(
            "/open-apis/auth/v3/tenant_access_token/internal",
            post(|| async { Json(json!({"code": 10014, "msg": "app secret invalid"})) }),
        ))
        .await;

        let err = client.tenant_access_token("cli_a", "wrong").await.unwrap_err();
        assert!(matches!(err, AppError::Auth(ref m) if m.contains("app secret invalid")));
    }

    #[tokio::test]
    async fn test_listing_follows_pages() {
        let client = serve(Router::new().route(
            "/open-apis/drive/v1/files",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                assert_eq!(q.get("folder_token").map(String::as_str), Some("fld"));
                match q.get("page_token").map(String::as_str) {
                    None => Json(json!({"code": 0, "data": {
                        "files": [{"name": "a", "type": "sheet", "token": "s1"}],
                        "has_more": true, "next_page_token": "p2"}})),
                    Some("p2") => Json(json!({"code": 0, "data": {
                        "files": [{"name": "b", "type": "sheet", "token": "s2"}],
                        "has_more": false}})),
                    Some(other) => panic!("unexpected page token {other}"),
                }
            }),
        ))
        .await;

        let titles = client.list_titles("u-1", Some("fld")).await.unwrap();
        assert_eq!(titles, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_rejections_map_to_error_classes() {
        let client = serve(
            Router::new()
                .route(
                    "/open-apis/sheets/v3/spreadsheets",
                    post(|| async { Json(json!({"code": 1310213, "msg": "permission denied"})) }),
                )
                .route(
                    "/open-apis/drive/v1/files",
                    get(|| async { Json(json!({"code": 99991677, "msg": "token expired"})) }),
                ),
        )
        .await;

        let err = client.create_spreadsheet("u-1", "t", None).await.unwrap_err();
        match err {
            AppError::RemoteApi { code, msg, .. } => {
                assert_eq!(code, 1310213);
                assert_eq!(msg, "permission denied");
            }
            other => panic!("expected RemoteApi, got {other:?}"),
        }

        let err = client.list_titles("u-1", None).await.unwrap_err();
        assert!(matches!(err, AppError::Auth(_)));
    }
}
