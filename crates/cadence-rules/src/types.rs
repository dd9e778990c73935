use std::fmt;

use cadence_core::{ScheduleKey, SyncType};
use serde::{Deserialize, Serialize};

/// Whether the rule engine currently fires a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleState {
    Enabled,
    Disabled,
}

impl fmt::Display for RuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleState::Enabled => f.write_str("enabled"),
            RuleState::Disabled => f.write_str("disabled"),
        }
    }
}

/// The only input an execution unit receives when its rule fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleInput {
    pub tenant_id: String,
    pub sync_type: SyncType,
}

impl RuleInput {
    pub fn key(&self) -> ScheduleKey {
        ScheduleKey::new(self.tenant_id.clone(), self.sync_type)
    }
}

impl From<&ScheduleKey> for RuleInput {
    fn from(key: &ScheduleKey) -> Self {
        Self {
            tenant_id: key.tenant_id.clone(),
            sync_type: key.sync_type,
        }
    }
}

/// Adapter-side projection of one rule. Not authoritative: it can be
/// destroyed and rebuilt from the schedule store without data loss.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalRule {
    pub name: String,
    pub interval_secs: u64,
    /// Execution-unit reference the rule invokes.
    pub target: String,
    pub state: RuleState,
    pub input: RuleInput,
}
