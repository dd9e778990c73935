//! The external execution unit: one sync per invocation.
//!
//! A fired rule hands over `{tenant_id, sync_type}` and nothing else. The
//! process exit code is the only signal the rule engine reads, so every
//! outcome maps onto [`EXIT_SUCCESS`], [`EXIT_FAILURE`] or [`EXIT_BAD_INPUT`].

use cadence_core::config::CadenceConfig;
use cadence_core::{RunStatus, ScheduleRun, SyncType, TriggerSource};
use cadence_executor::{ExecutorError, SyncExecutor};
use cadence_rules::RuleInput;
use cadence_store::ScheduleStore;
use tracing::{error, info, warn};

/// Rule input as JSON, for engines that pass it through the environment.
pub const RULE_INPUT_ENV: &str = "CADENCE_RULE_INPUT";

/// Sync succeeded, or was skipped because another run holds the key.
pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_BAD_INPUT: u8 = 2;

/// Input from `--tenant-id`/`--sync-type`, else from [`RULE_INPUT_ENV`].
pub fn resolve_input(
    tenant_id: Option<String>,
    sync_type: Option<String>,
    rule_input: Option<&str>,
) -> Result<RuleInput, String> {
    let input = match (tenant_id, sync_type) {
        (Some(tenant_id), Some(sync_type)) => RuleInput {
            tenant_id,
            sync_type: sync_type.parse::<SyncType>()?,
        },
        (None, None) => {
            let raw = rule_input.ok_or_else(|| {
                format!("pass --tenant-id and --sync-type or set {RULE_INPUT_ENV}")
            })?;
            serde_json::from_str(raw).map_err(|e| format!("invalid {RULE_INPUT_ENV}: {e}"))?
        }
        _ => return Err("--tenant-id and --sync-type must be given together".to_string()),
    };

    if input.tenant_id.trim().is_empty() {
        return Err("tenant_id must not be empty".to_string());
    }
    Ok(input)
}

/// Strict config load. Unlike the gateway, the worker never falls back to
/// defaults: the default database path is not the shared ledger, and a run
/// recorded there would bypass the per-key mutex.
pub fn load_config(path: Option<&str>) -> cadence_core::Result<CadenceConfig> {
    CadenceConfig::load(path)
}

pub fn exit_code(result: &Result<ScheduleRun, ExecutorError>) -> u8 {
    match result {
        Ok(run) if run.status == RunStatus::Failed => EXIT_FAILURE,
        Ok(_) => EXIT_SUCCESS,
        Err(_) => EXIT_FAILURE,
    }
}

/// Run the sync for `input` with `trigger_source=external`.
///
/// A rule can outlive its schedule when a disable call failed and waits for
/// the next sweep. Such a fire is dropped unless the stored config is enabled
/// and owned by the external mechanism.
pub async fn run_once(store: &ScheduleStore, executor: &SyncExecutor, input: &RuleInput) -> u8 {
    let key = input.key();
    match store.get_schedule(&key) {
        Ok(Some(config)) if config.is_active_for(TriggerSource::External) => {}
        Ok(config) => {
            warn!(
                %key,
                enabled = ?config.as_ref().map(|c| c.enabled),
                active = ?config.as_ref().map(|c| c.active_trigger_source),
                "rule fired for a schedule it does not own; sync not run"
            );
            return EXIT_SUCCESS;
        }
        Err(e) => {
            error!(%key, error = %e, code = e.code(), "schedule lookup failed");
            return EXIT_FAILURE;
        }
    }

    let result = executor.run(&key, TriggerSource::External).await;
    match &result {
        Ok(run) => info!(
            %key,
            run_id = %run.run_id,
            status = %run.status,
            items = ?run.item_count,
            "worker finished"
        ),
        Err(e) => error!(%key, error = %e, code = e.code(), "worker failed"),
    }
    exit_code(&result)
}
