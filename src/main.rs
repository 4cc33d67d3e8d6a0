use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use webhook_relay::auth::AdminCredentials;
use webhook_relay::config::Config;
use webhook_relay::http_server::{admin_router, bind, public_router, serve};
use webhook_relay::{AppState, Forwarder, JsonStore};

// ─── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let Err(error) = run().await else {
        tracing::info!("relay stopped");
        return;
    };

    if tracing::enabled!(tracing::Level::ERROR) {
        tracing::error!(error = %format!("{error:#}"), "relay terminated with error");
    } else {
        eprintln!("Error: {error:#}");
    }
    process::exit(1);
}

async fn run() -> anyhow::Result<()> {
    let config = Config::parse();
    init_tracing()?;

    let admin_prefix = config.admin_prefix()?;
    tracing::info!(
        listen = %config.listen,
        admin_listen = %config.admin_listen,
        admin_path = %admin_prefix,
        data_dir = ?config.data_dir,
        max_body_bytes = config.max_body_bytes,
        "configuration loaded"
    );

    let store = match &config.data_dir {
        Some(dir) => JsonStore::open(dir)
            .await
            .with_context(|| format!("failed to open storage in {}", dir.display()))?,
        None => JsonStore::in_memory(),
    };
    let store = Arc::new(store.with_max_requests(config.max_requests));

    let forwarder = Forwarder::new().context("failed to create forwarding client")?;
    let state = AppState::with_store(store, forwarder).with_max_body_bytes(config.max_body_bytes);

    let registered = state
        .register_stored_webhooks()
        .await
        .context("failed to load stored webhooks")?;
    tracing::info!(count = registered, "stored webhooks registered");

    let credentials = AdminCredentials::new(&config.username, &config.password);
    let admin = admin_router(state.clone(), credentials, &admin_prefix);
    let public = public_router(state);

    if config.shared_listener() {
        let listener = bind(config.listen).await.context("failed to bind listener")?;
        serve(listener, public.merge(admin)).await?;
    } else {
        let public_listener = bind(config.listen)
            .await
            .context("failed to bind public listener")?;
        let admin_listener = bind(config.admin_listen)
            .await
            .context("failed to bind admin listener")?;
        tokio::try_join!(serve(public_listener, public), serve(admin_listener, admin))?;
    }

    Ok(())
}

// ─── Tracing ─────────────────────────────────────────────────────────────────

/// Log level comes from `RUST_LOG`, defaulting to `info`.
fn init_tracing() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("failed to create env filter: {e}"))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_level(true))
        .with(env_filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    Ok(())
}
