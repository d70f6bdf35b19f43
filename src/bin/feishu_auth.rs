//! Feishu credential setup: template, tenant mode, browser or pasted-URL
//! authorization, connectivity checks and one-off CSV uploads.

use anyhow::{Context, Result, bail};
use clap::{ArgGroup, Parser};
use std::io::{BufRead, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use xinfadi_scraper::config::{AppConfig, FeishuConfig};
use xinfadi_scraper::feishu::credential::{
    self, AuthMode, CredentialStore, FeishuCredentials, JsonFileStore,
};
use xinfadi_scraper::feishu::oauth::{self, CallbackServer};
use xinfadi_scraper::feishu::{FeishuClient, RemoteSync};
use xinfadi_scraper::loader::load_price_csv;
use xinfadi_scraper::utils;

#[derive(Parser)]
#[command(name = "feishu-auth", about = "Feishu spreadsheet credential setup", version)]
#[command(group(
    ArgGroup::new("action")
        .required(true)
        .args(["init", "simple", "auth", "auth_manual", "test", "list_files", "upload"])
))]
struct Cli {
    /// Write a credential file template
    #[arg(long)]
    init: bool,

    /// Use the application (tenant) token; no browser needed
    #[arg(long)]
    simple: bool,

    /// Authorize as a user through the browser and a local callback
    #[arg(long)]
    auth: bool,

    /// Authorize as a user by pasting the redirect URL
    #[arg(long)]
    auth_manual: bool,

    /// Check that a token can be obtained and the drive is reachable
    #[arg(long)]
    test: bool,

    /// List files in the target folder
    #[arg(long)]
    list_files: bool,

    /// Upload an exported CSV as a new spreadsheet
    #[arg(long, value_name = "FILE")]
    upload: Option<PathBuf>,

    /// Spreadsheet title for --upload [default: file name]
    #[arg(long, requires = "upload")]
    title: Option<String>,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

fn configured(store: &JsonFileStore) -> Result<FeishuCredentials> {
    let creds = store.load()?;
    if !creds.is_configured() {
        bail!(
            "{} has no app_id/app_secret; run `feishu-auth --init` and fill them in",
            store.path().display()
        );
    }
    Ok(creds)
}

fn target_folder(cfg: &FeishuConfig, creds: &FeishuCredentials) -> Option<String> {
    cfg.folder_token.clone().or_else(|| creds.folder_token.clone())
}

async fn authorize_in_browser(cfg: &FeishuConfig, client: &FeishuClient, store: &JsonFileStore) -> Result<()> {
    let creds = configured(store)?;
    let server = CallbackServer::bind(SocketAddr::from(([127, 0, 0, 1], cfg.redirect_port))).await?;

    let url = oauth::authorize_url(&cfg.base_url, &creds.app_id, &oauth::redirect_uri(cfg.redirect_port))?;
    println!("Open this URL in a browser and approve access:\n\n  {}\n", url);
    println!("Waiting up to {}s for the callback...", cfg.auth_timeout_secs);

    let code = server
        .wait(Duration::from_secs(cfg.auth_timeout_secs))
        .await
        .context("No authorization code received; check the redirect URL and app permissions")?;

    let creds = credential::complete_user_auth(client, store, &code).await?;
    println!(
        "Authorized{}. Tokens saved to {}",
        creds.user_name.map(|n| format!(" as {}", n)).unwrap_or_default(),
        store.path().display()
    );
    Ok(())
}

async fn authorize_manually(cfg: &FeishuConfig, client: &FeishuClient, store: &JsonFileStore) -> Result<()> {
    let creds = configured(store)?;
    let url = oauth::authorize_url(&cfg.base_url, &creds.app_id, &oauth::redirect_uri(cfg.redirect_port))?;

    println!("1. Open this URL in a browser:\n\n  {}\n", url);
    println!("2. After approving, the browser lands on an unreachable localhost page");
    println!("3. Copy the full address (http://localhost:{}/callback?code=...)\n", cfg.redirect_port);
    print!("Paste URL: ");
    std::io::stdout().flush()?;

    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let code = oauth::parse_callback_url(&line)?;

    credential::complete_user_auth(client, store, &code).await?;
    println!("Authorized. Tokens saved to {}", store.path().display());
    Ok(())
}

async fn upload(
    cfg: &FeishuConfig,
    client: &FeishuClient,
    store: Arc<JsonFileStore>,
    file: &Path,
    title: Option<String>,
) -> Result<()> {
    let creds = configured(&store)?;
    let table = load_price_csv(file).with_context(|| format!("Cannot read {}", file.display()))?;
    let title = title.unwrap_or_else(|| {
        file.file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("upload")
            .to_string()
    });

    let tokens = credential::token_provider(client.clone(), store)?;
    let doc = RemoteSync::new(client, tokens.as_ref())
        .with_folder(target_folder(cfg, &creds))
        .with_batch_rows(cfg.write_batch_rows)
        .sync(&table, &title)
        .await?;

    println!("Uploaded {} rows as \"{}\"", table.len(), doc.title);
    if let Some(url) = doc.url {
        println!("{}", url);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    utils::init_tracing(cli.verbose);

    let config = AppConfig::load().context("Failed to load configuration")?;
    let cfg = &config.feishu;
    let store = Arc::new(JsonFileStore::new(&cfg.credentials_path));
    let client = FeishuClient::new(cfg)?;

    if cli.init {
        if store.create_template()? {
            println!("Template written to {}", store.path().display());
            println!("Fill in app_id and app_secret, then run --simple or --auth");
        } else {
            println!("{} already exists; left untouched", store.path().display());
        }
    } else if cli.simple {
        configured(&store)?;
        credential::enable_tenant_mode(&client, store.as_ref()).await?;
        println!("Tenant mode enabled; --sync-feishu will use the app's own drive");
    } else if cli.auth {
        authorize_in_browser(cfg, &client, &store).await?;
    } else if cli.auth_manual {
        authorize_manually(cfg, &client, &store).await?;
    } else if cli.test || cli.list_files {
        let creds = configured(&store)?;
        let folder = target_folder(cfg, &creds);
        let tokens = credential::token_provider(client.clone(), store.clone())?;

        let mode = match tokens.mode() {
            AuthMode::Tenant => "tenant (application)",
            AuthMode::User => "user",
        };
        info!("Auth mode: {}", mode);
        let token = tokens.bearer_token().await?;
        let files = client.list_files(&token, folder.as_deref()).await?;

        if cli.test {
            println!("Mode   : {}", mode);
            println!("Token  : ok");
            println!("Files  : {}", files.len());
            println!("Connection test passed");
        } else if files.is_empty() {
            println!("No files in {}", folder.as_deref().unwrap_or("root folder"));
        } else {
            for f in &files {
                println!("  [{}] {}  ({})", f.kind, f.name, f.token);
            }
        }
    } else if let Some(file) = &cli.upload {
        upload(cfg, &client, store.clone(), file, cli.title.clone()).await?;
    }

    Ok(())
}
