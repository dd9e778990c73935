//! Builds the scheduler stack from a [`CadenceConfig`].
//!
//! Shared by both binaries: the gateway builds everything, the worker only
//! needs the ledger and the executor.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use cadence_controller::ScheduleController;
use cadence_core::config::{CadenceConfig, RuleBackend, RulesConfig};
use cadence_executor::{HttpIngestionClient, SyncExecutor};
use cadence_rules::{HttpRuleEngine, MemoryRuleEngine, RuleEngine, RuleReconciler};
use cadence_scheduler::TriggerEngine;
use cadence_store::{RunLedger, ScheduleStore, SharedConnection};
use tracing::{info, warn};

/// Everything the gateway process runs.
pub struct Stack {
    pub controller: ScheduleController,
    /// Not yet spawned; `None` when `scheduler.enabled` is off.
    pub engine: Option<TriggerEngine>,
}

/// Load config: explicit path > `CADENCE_CONFIG` > `~/.cadence/cadence.toml`.
/// Falls back to defaults when loading or validation fails.
pub fn load_config(path: Option<&str>) -> CadenceConfig {
    CadenceConfig::load(path).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        CadenceConfig::default()
    })
}

pub fn open_db(config: &CadenceConfig) -> anyhow::Result<SharedConnection> {
    let db = &config.database;
    info!(path = %db.path, "opening SQLite database");
    cadence_store::open(&db.path, Duration::from_millis(db.busy_timeout_ms))
        .with_context(|| format!("opening {}", db.path))
}

pub fn build_executor(
    config: &CadenceConfig,
    ledger: Arc<RunLedger>,
) -> anyhow::Result<SyncExecutor> {
    let ingestion = &config.ingestion;
    let client = HttpIngestionClient::new(
        ingestion.endpoint.clone(),
        ingestion.api_token.clone(),
        Duration::from_secs(ingestion.request_timeout_secs),
    )
    .context("building ingestion client")?;

    let run_timeout = match config.scheduler.run_timeout_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };
    Ok(SyncExecutor::new(
        ledger,
        Arc::new(client),
        run_timeout,
        config.ledger.error_detail_max,
    ))
}

pub fn build_rule_engine(rules: &RulesConfig) -> anyhow::Result<Arc<dyn RuleEngine>> {
    match rules.backend {
        RuleBackend::Memory => {
            warn!("rules use the in-memory backend; rules are lost on restart");
            Ok(Arc::new(MemoryRuleEngine::new()))
        }
        RuleBackend::Http => {
            let endpoint = rules
                .endpoint
                .clone()
                .context("rules.endpoint is required for the http backend")?;
            let engine = HttpRuleEngine::new(endpoint, rules.api_token.clone())
                .context("building rule engine client")?;
            Ok(Arc::new(engine))
        }
    }
}

/// Wire store, ledger, executor, both trigger mechanisms and the controller.
pub fn build(config: &CadenceConfig) -> anyhow::Result<Stack> {
    let conn = open_db(config)?;
    let store = Arc::new(ScheduleStore::new(conn.clone()));
    let ledger = Arc::new(RunLedger::new(conn));
    info!("database migrations complete");

    let executor = Arc::new(build_executor(config, ledger.clone())?);
    let mut controller = ScheduleController::new(
        store.clone(),
        ledger,
        config.limits.clone(),
        config.ledger.clone(),
    );

    let engine = if config.scheduler.enabled {
        let engine = TriggerEngine::new(store.clone(), executor, &config.scheduler);
        controller = controller.with_engine(engine.handle());
        Some(engine)
    } else {
        info!("in-process trigger engine disabled");
        None
    };

    if config.rules.enabled {
        let rule_engine = build_rule_engine(&config.rules)?;
        let reconciler = RuleReconciler::from_config(store, rule_engine, &config.rules);
        controller = controller.with_reconciler(Arc::new(reconciler));
    } else {
        info!("external trigger adapter disabled");
    }

    info!(mechanisms = ?controller.mechanisms(), "scheduler stack ready");
    Ok(Stack { controller, engine })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_wires_enabled_mechanisms() {
        let dir = std::env::temp_dir().join(format!("cadence-bootstrap-{}", std::process::id()));
        let mut config = CadenceConfig::default();
        config.database.path = dir.join("cadence.db").to_string_lossy().into_owned();
        config.scheduler.enabled = true;
        config.rules.enabled = true;

        let stack = build(&config).unwrap();
        assert_eq!(stack.controller.mechanisms(), vec!["in_process", "external"]);
        assert!(stack.engine.is_some());

        config.scheduler.enabled = false;
        config.rules.enabled = false;
        let stack = build(&config).unwrap();
        assert!(stack.controller.mechanisms().is_empty());
        assert!(stack.engine.is_none());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn http_backend_requires_an_endpoint() {
        let rules = RulesConfig {
            backend: RuleBackend::Http,
            endpoint: None,
            ..RulesConfig::default()
        };
        assert!(build_rule_engine(&rules).is_err());
    }
}
