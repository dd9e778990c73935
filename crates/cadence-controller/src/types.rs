use cadence_core::{
    ReconcileSummary, ScheduleRun, SyncType, TenantScheduleConfig, TriggerSource,
};
use cadence_scheduler::SlotSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Body of `POST /schedules`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub tenant_id: String,
    pub sync_type: SyncType,
    pub interval_hours: f64,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Defaults to `limits.default_trigger_source`.
    #[serde(default)]
    pub trigger_source: Option<TriggerSource>,
}

fn enabled_by_default() -> bool {
    true
}

/// Outcome of one trigger mechanism's reconciliation after a write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MechanismReport {
    pub mechanism: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<ReconcileSummary>,
    /// Set when the pass failed as a whole; the next sweep retries it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a create, update or delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleChange {
    pub schedule: TenantScheduleConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<TenantScheduleConfig>,
    pub reconciliation: Vec<MechanismReport>,
}

/// One sync type of a tenant, as returned by `GET /schedules/{tenant_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleStatus {
    pub config: TenantScheduleConfig,
    pub last_runs: Vec<ScheduleRun>,
    /// `None` for a disabled schedule or one that is firing right now.
    pub next_fire_estimate: Option<DateTime<Utc>>,
    /// In-process trigger slot, when this process arms the schedule.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<SlotSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantStatus {
    pub tenant_id: String,
    pub schedules: Vec<ScheduleStatus>,
}

/// One row of the operator health view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleHealth {
    pub sync_type: SyncType,
    pub enabled: bool,
    pub interval_secs: u64,
    pub active_trigger_source: TriggerSource,
    pub last_run: Option<ScheduleRun>,
}

/// What one housekeeping sweep did.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepReport {
    /// `running` rows released as abandoned.
    pub stale_failed: usize,
    pub pruned: usize,
    pub reconciliation: Vec<MechanismReport>,
}
