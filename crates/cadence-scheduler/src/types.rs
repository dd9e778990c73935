use std::fmt;

use cadence_core::{ScheduleKey, SyncType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of one `(tenant_id, sync_type)` trigger slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerState {
    /// Registered, no fire time computed yet.
    Idle,
    /// Waiting for `next_fire`.
    Armed,
    /// Due; the fire task is taking the ledger's running row.
    Firing,
    /// A run started by this slot is in flight.
    Executing,
    /// The last fire found the key held by another run; re-armed one
    /// interval later.
    Skipped,
}

impl TriggerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerState::Idle => "idle",
            TriggerState::Armed => "armed",
            TriggerState::Firing => "firing",
            TriggerState::Executing => "executing",
            TriggerState::Skipped => "skipped",
        }
    }

    /// Waiting on a timer, as opposed to having a fire in flight.
    pub fn is_waiting(&self) -> bool {
        matches!(self, TriggerState::Armed | TriggerState::Skipped)
    }
}

impl fmt::Display for TriggerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a slot, as served by the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSnapshot {
    pub tenant_id: String,
    pub sync_type: SyncType,
    pub state: TriggerState,
    pub interval_secs: u64,
    pub next_fire: Option<DateTime<Utc>>,
    pub last_fire: Option<DateTime<Utc>>,
    /// Run id of the in-flight execution, while `executing`.
    pub run_id: Option<String>,
}

impl SlotSnapshot {
    pub fn key(&self) -> ScheduleKey {
        ScheduleKey::new(self.tenant_id.clone(), self.sync_type)
    }
}
