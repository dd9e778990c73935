use std::process::ExitCode;
use std::sync::Arc;

use cadence_gateway::{bootstrap, worker};
use cadence_store::{RunLedger, ScheduleStore};
use clap::Parser;
use tracing::error;

#[derive(Parser)]
#[command(
    name = "cadence-worker",
    version,
    about = "Run one incremental sync for a tenant (external trigger target)"
)]
struct Args {
    /// Path to cadence.toml
    #[arg(long, env = "CADENCE_CONFIG")]
    config: Option<String>,
    #[arg(long)]
    tenant_id: Option<String>,
    /// ticket | article | agent
    #[arg(long)]
    sync_type: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "cadence_worker=info,cadence_gateway=info,cadence_executor=info".into()
            }),
        )
        .init();

    let args = Args::parse();
    let rule_input = std::env::var(worker::RULE_INPUT_ENV).ok();
    let input = match worker::resolve_input(args.tenant_id, args.sync_type, rule_input.as_deref())
    {
        Ok(input) => input,
        Err(reason) => {
            error!(%reason, "bad rule input");
            return ExitCode::from(worker::EXIT_BAD_INPUT);
        }
    };

    let config = match worker::load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "config load failed");
            return ExitCode::from(worker::EXIT_FAILURE);
        }
    };
    let started = bootstrap::open_db(&config).and_then(|conn| {
        let executor = bootstrap::build_executor(&config, Arc::new(RunLedger::new(conn.clone())))?;
        Ok((ScheduleStore::new(conn), executor))
    });
    let (store, executor) = match started {
        Ok(parts) => parts,
        Err(e) => {
            error!(error = %e, "worker startup failed");
            return ExitCode::from(worker::EXIT_FAILURE);
        }
    };

    ExitCode::from(worker::run_once(&store, &executor, &input).await)
}
