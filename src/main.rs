use clap::{Parser, Subcommand};
use postback_relay::app::ports::{TaskApiPort, WebhookPort};
use postback_relay::config::Config;
use postback_relay::infra::{ReqwestTaskApi, ReqwestWebhook};
use postback_relay::relay::{submitter::parse_request_body, TokenAuthority};
use postback_relay::server::{start_server, AppState};
use postback_relay::storage::{InMemoryStore, KvStore};
use postback_relay::{logging, metrics};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "postback_relay")]
#[command(about = "Relays task submissions upstream and fans completed results out to webhooks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP relay
    Serve {
        /// Port to listen on (overrides config and PORT)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Check a submission body against the request schema
    ValidateRequest {
        /// Path to a JSON file holding the submission body
        file: PathBuf,
    },
}

#[cfg(feature = "db")]
async fn open_store() -> anyhow::Result<Arc<dyn KvStore>> {
    if std::env::var("LIBSQL_URL").is_ok() {
        let store = postback_relay::db::LibsqlStore::from_env().await?;
        store.run_migrations().await?;
        return Ok(Arc::new(store));
    }
    warn!("LIBSQL_URL not set, using in-memory store");
    Ok(Arc::new(InMemoryStore::new()))
}

#[cfg(not(feature = "db"))]
async fn open_store() -> anyhow::Result<Arc<dyn KvStore>> {
    warn!("Built without the db feature, using in-memory store");
    Ok(Arc::new(InMemoryStore::new()))
}

async fn serve(port: Option<u16>) -> anyhow::Result<()> {
    let config = Config::load()?;
    let endpoint = config.task_api_endpoint()?;
    metrics::init_metrics();

    let authority = TokenAuthority::from_env();
    info!("Loaded {} client credentials", authority.len());

    let store = open_store().await?;
    let task_api: Arc<dyn TaskApiPort> = Arc::new(ReqwestTaskApi::new(
        &endpoint.url,
        &endpoint.login,
        &endpoint.password,
    )?);
    let webhook: Arc<dyn WebhookPort> = Arc::new(ReqwestWebhook::new()?);
    if config.endpoints.webhook_url.is_none() {
        warn!("WEBHOOK_URL not set; postbacks without a per-request webhook will fail");
    }

    let state = AppState::new(&config, store, task_api, webhook, authority);
    start_server(Arc::new(state), port.unwrap_or(config.server.port)).await
}

fn validate_request(file: &PathBuf) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(file)?;
    let body: serde_json::Value = serde_json::from_str(&content)?;
    match parse_request_body(&body) {
        Ok(request) => {
            println!("✅ {} is a valid submission", file.display());
            println!("{}", serde_json::to_string_pretty(&request)?);
            Ok(())
        }
        Err(e) => {
            println!("❌ {}: {}", file.display(), e);
            Err(e.into())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let _guard = logging::init_logging();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port } => serve(port).await,
        Commands::ValidateRequest { file } => validate_request(&file),
    }
}
