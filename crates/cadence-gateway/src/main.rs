use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use cadence_gateway::{app, bootstrap, sweeper};
use clap::Parser;
use tracing::info;

#[derive(Parser)]
#[command(name = "cadence-gateway", version, about = "Incremental-sync scheduler gateway")]
struct Args {
    /// Path to cadence.toml
    #[arg(long, env = "CADENCE_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cadence_gateway=info,tower_http=debug".into()),
        )
        .init();

    let args = Args::parse();
    let config = bootstrap::load_config(args.config.as_deref());

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    let sweep_every = Duration::from_secs(config.ledger.sweep_interval_secs);
    if config.auth.operator_token.is_none() && config.auth.tenant_tokens.is_empty() {
        tracing::warn!("no auth tokens configured; every /schedules request will be rejected");
    }

    let stack = bootstrap::build(&config)?;
    let state = Arc::new(app::AppState::new(config, stack.controller));
    let router = app::build_router(state.clone());

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    if let Some(engine) = stack.engine {
        let rx = shutdown_rx.clone();
        tokio::spawn(async move { engine.run(rx).await });
    }
    tokio::spawn(sweeper::run(
        state.controller.clone(),
        sweep_every,
        shutdown_rx,
    ));

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("Cadence gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;

    // stop the trigger engine and the sweeper; in-flight runs are released
    // by the stale-run sweep of whichever process starts next
    let _ = shutdown_tx.send(true);
    Ok(())
}
