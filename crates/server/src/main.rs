//! Pushi broker binary (`spec.md` §2, component C9): loads configuration,
//! wires the Repository, adapters, and `Broker` together, then binds the
//! two listeners — control-plane HTTP and realtime WebSocket.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use pushi_adapters::{Adapter, EmailAdapter, MobilePushAdapter, WebPushAdapter, WebhookAdapter};
use pushi_broker::{AppCache, Broker};
use pushi_common::PushiConfig;
use pushi_http::{http_router, AppState};
use pushi_repository::memory::InMemoryRepository;
use pushi_repository::postgres::PostgresRepository;
use pushi_repository::Repository;
use pushi_ws::{ws_router, Limiters, WsState};
use tracing::info;

#[derive(Parser)]
#[command(name = "pushi-server")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = "Pushi Contributors")]
#[command(about = "Multi-tenant realtime pub/sub broker")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error), overridden by RUST_LOG.
    #[arg(short, long, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Postgres connection string. When unset the broker runs against an
    /// in-memory repository (`spec.md` §6 "a working in-memory
    /// implementation ships so the broker runs standalone").
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Endpoint the mobile push adapter POSTs to (`spec.md` §4.4).
    #[arg(long, env = "APN_ENDPOINT", default_value = "https://api.push.apple.com/3/device")]
    apn_endpoint: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = cli.log_level.as_deref().unwrap_or("info");
    pushi_common::tracing_setup::init_tracing(log_level)?;

    info!("pushi-server starting");

    let config = PushiConfig::load(Some(&cli.config)).context("failed to load configuration")?;

    let repository: Arc<dyn Repository> = match &cli.database_url {
        Some(url) => {
            info!("connecting to postgres repository");
            Arc::new(
                PostgresRepository::connect(url)
                    .await
                    .context("failed to connect to postgres")?,
            )
        }
        None => {
            info!("no DATABASE_URL set, using in-memory repository");
            Arc::new(InMemoryRepository::new())
        }
    };

    let apps = AppCache::new();
    let directory: Arc<dyn pushi_adapters::AppDirectory> = apps.clone();

    let global_smtp_url = resolve_global_smtp_url(&config);
    let adapters: Vec<Arc<dyn Adapter>> = vec![
        Arc::new(WebhookAdapter::new()),
        Arc::new(MobilePushAdapter::new(directory.clone(), cli.apn_endpoint.clone())),
        Arc::new(EmailAdapter::new(directory.clone(), global_smtp_url)),
        Arc::new(WebPushAdapter::new(directory)),
    ];

    let broker = Arc::new(Broker::new(config.clone(), repository, adapters, apps));
    broker
        .start()
        .await
        .context("broker failed to load apps/subscriptions from the repository")?;

    let control_addr = format!("{}:{}", config.server.host, config.server.control_port);
    let realtime_addr = format!("{}:{}", config.server.host, config.server.app_port);

    let http_app = http_router(AppState { broker: broker.clone() });
    let ws_app = ws_router(WsState {
        broker: broker.clone(),
        limiters: Limiters::new(),
    })
    .into_make_service_with_connect_info::<std::net::SocketAddr>();

    info!(%control_addr, "binding control-plane HTTP listener");
    info!(%realtime_addr, "binding realtime WebSocket listener");

    let control_listener = tokio::net::TcpListener::bind(&control_addr)
        .await
        .with_context(|| format!("failed to bind control-plane listener on {control_addr}"))?;
    let realtime_listener = tokio::net::TcpListener::bind(&realtime_addr)
        .await
        .with_context(|| format!("failed to bind realtime listener on {realtime_addr}"))?;

    let control_server = axum::serve(control_listener, http_app);
    let realtime_server = axum::serve(realtime_listener, ws_app);

    tokio::try_join!(
        async { control_server.await.context("control-plane server failed") },
        async { realtime_server.await.context("realtime server failed") },
    )?;

    Ok(())
}

/// Builds a single `smtp://` URL from `SmtpConfig`'s parts, mirroring the
/// per-App `smtp_url` shape `EmailAdapter` already knows how to parse
/// (`spec.md` §4.4, §6). Returns `None` when no host is configured.
fn resolve_global_smtp_url(config: &PushiConfig) -> Option<String> {
    if let Some(url) = &config.smtp.url {
        return Some(url.clone());
    }
    let host = config.smtp.host.as_ref()?;
    let scheme = if config.smtp.starttls { "smtp" } else { "smtps" };
    let userinfo = match (&config.smtp.user, &config.smtp.password) {
        (Some(user), Some(pass)) => format!("{user}:{pass}@"),
        (Some(user), None) => format!("{user}@"),
        _ => String::new(),
    };
    let port = config.smtp.port.map(|p| format!(":{p}")).unwrap_or_default();
    let query = config
        .smtp
        .sender
        .as_ref()
        .map(|s| format!("?sender={s}"))
        .unwrap_or_default();
    Some(format!("{scheme}://{userinfo}{host}{port}{query}"))
}
