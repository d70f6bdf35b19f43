//! Browser authorization: the URL to open and a one-shot local callback listener.

use crate::error::{AppError, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, info};
use url::Url;

pub const CALLBACK_PATH: &str = "/callback";
const AUTH_STATE: &str = "xinfadi_sync";

const SUCCESS_PAGE: &str = "<html><head><meta charset=\"utf-8\"><title>授权成功</title></head>\
<body style=\"font-family: sans-serif; text-align: center; padding-top: 50px;\">\
<h1>授权成功</h1><p>可以关闭此页面，返回终端查看结果。</p></body></html>";

pub fn redirect_uri(port: u16) -> String {
    format!("http://localhost:{}{}", port, CALLBACK_PATH)
}

pub fn authorize_url(base_url: &str, app_id: &str, redirect_uri: &str) -> Result<Url> {
    let mut url = Url::parse(&format!("{}/authen/v1/index", base_url.trim_end_matches('/')))
        .map_err(|e| AppError::Config(format!("invalid Feishu base_url: {}", e)))?;
    url.query_pairs_mut()
        .append_pair("app_id", app_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("state", AUTH_STATE);
    Ok(url)
}

/// Pull the authorization code out of a redirect URL pasted by the user.
pub fn parse_callback_url(input: &str) -> Result<String> {
    let url = Url::parse(input.trim())
        .map_err(|e| AppError::InvalidInput(format!("not a URL ({}): {}", e, input.trim())))?;

    let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
    code_from_params(&params)
}

fn code_from_params(params: &HashMap<String, String>) -> Result<String> {
    if let Some(code) = params.get("code").filter(|c| !c.is_empty()) {
        return Ok(code.clone());
    }
    match params.get("error") {
        Some(reason) => Err(AppError::Auth(format!("authorization denied: {}", reason))),
        None => Err(AppError::InvalidInput("no `code` parameter in callback URL".into())),
    }
}

type Outcome = std::result::Result<String, String>;
type Slot = Arc<Mutex<Option<oneshot::Sender<Outcome>>>>;

/// Accepts exactly one `GET /callback`, then shuts down.
pub struct CallbackServer {
    listener: TcpListener,
}

impl CallbackServer {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            AppError::Auth(format!("cannot listen on {} ({}); is the port in use?", addr, e))
        })?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| AppError::Auth(format!("callback listener has no address: {}", e)))
    }

    pub async fn wait(self, timeout: Duration) -> Result<String> {
        let (tx, rx) = oneshot::channel::<Outcome>();
        let slot: Slot = Arc::new(Mutex::new(Some(tx)));
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let router = Router::new()
            .route(CALLBACK_PATH, get(handle_callback))
            .with_state(slot);

        if let Ok(addr) = self.listener.local_addr() {
            info!("Waiting for authorization callback on http://{}{}", addr, CALLBACK_PATH);
        }

        let server = tokio::spawn(async move {
            axum::serve(self.listener, router)
                .with_graceful_shutdown(async {
                    let _ = stop_rx.await;
                })
                .await
        });

        let outcome = tokio::time::timeout(timeout, rx).await;
        let _ = stop_tx.send(());
        if tokio::time::timeout(Duration::from_secs(2), server).await.is_err() {
            debug!("callback server did not stop in time");
        }

        match outcome {
            Err(_) => Err(AppError::Auth(format!(
                "no authorization callback within {}s",
                timeout.as_secs()
            ))),
            Ok(Err(_)) => Err(AppError::Auth("callback listener stopped unexpectedly".into())),
            Ok(Ok(Ok(code))) => Ok(code),
            Ok(Ok(Err(reason))) => Err(AppError::Auth(reason)),
        }
    }
}

async fn handle_callback(
    State(slot): State<Slot>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Html<String>) {
    let outcome = code_from_params(&params).map_err(|e| e.to_string());
    let reply = match &outcome {
        Ok(_) => (StatusCode::OK, Html(SUCCESS_PAGE.to_string())),
        Err(reason) => (
            StatusCode::BAD_REQUEST,
            Html(format!("<html><meta charset=\"utf-8\"><h1>授权失败</h1><p>{}</p></html>", quick_xml::escape::escape(reason.as_str()))),
        ),
    };

    let sender = slot.lock().ok().and_then(|mut s| s.take());
    if let Some(sender) = sender {
        let _ = sender.send(outcome);
    }
    reply
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn local() -> (CallbackServer, SocketAddr) {
        let server = CallbackServer::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = server.local_addr().unwrap();
        (server, addr)
    }

    #[test]
    fn test_authorize_url() {
        let url = authorize_url("https://open.feishu.cn/open-apis/", "cli_a", &redirect_uri(9000)).unwrap();
        assert_eq!(url.path(), "/open-apis/authen/v1/index");
        let q: HashMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(q["app_id"], "cli_a");
        assert_eq!(q["redirect_uri"], "http://localhost:9000/callback");
    }

    #[test]
    fn test_parse_callback_url() {
        assert_eq!(
            parse_callback_url(" http://localhost:9000/callback?code=abc123&state=xinfadi_sync ").unwrap(),
            "abc123"
        );
        assert!(matches!(
            parse_callback_url("http://localhost:9000/callback?error=access_denied"),
            Err(AppError::Auth(_))
        ));
        assert!(matches!(
            parse_callback_url("http://localhost:9000/callback"),
            Err(AppError::InvalidInput(_))
        ));
        assert!(matches!(parse_callback_url("code=abc"), Err(AppError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_single_callback_yields_code() {
        let (server, addr) = local().await;
        let waiting = tokio::spawn(server.wait(Duration::from_secs(10)));

        let resp = reqwest::get(format!("http://{}/callback?code=xyz&state=s", addr))
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert!(resp.text().await.unwrap().contains("授权成功"));

        assert_eq!(waiting.await.unwrap().unwrap(), "xyz");
    }

    #[tokio::test]
    async fn test_denied_callback() {
        let (server, addr) = local().await;
        let waiting = tokio::spawn(server.wait(Duration::from_secs(10)));

        let resp = reqwest::get(format!("http://{}/callback?error=access_denied", addr))
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

        assert!(matches!(waiting.await.unwrap(), Err(AppError::Auth(_))));
    }

    #[tokio::test]
    async fn test_times_out_without_callback() {
        let (server, _) = local().await;
        let err = server.wait(Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, AppError::Auth(ref m) if m.contains("no authorization callback")));
    }

    #[tokio::test]
    async fn test_busy_port_is_auth_error() {
        let (_held, addr) = local().await;
        assert!(matches!(CallbackServer::bind(addr).await, Err(AppError::Auth(_))));
    }
}
