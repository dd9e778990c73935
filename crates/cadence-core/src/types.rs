use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Which ingestion pipeline a schedule drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    Ticket,
    Article,
    Agent,
}

impl SyncType {
    pub const ALL: [SyncType; 3] = [SyncType::Ticket, SyncType::Article, SyncType::Agent];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncType::Ticket => "ticket",
            SyncType::Article => "article",
            SyncType::Agent => "agent",
        }
    }
}

impl fmt::Display for SyncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SyncType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ticket" => Ok(SyncType::Ticket),
            "article" => Ok(SyncType::Article),
            "agent" => Ok(SyncType::Agent),
            other => Err(format!("unknown sync type: {other}")),
        }
    }
}

/// The mechanism that fired a run (and, on a schedule, the one allowed to).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    /// Timer owned by the long-lived gateway process.
    #[default]
    InProcess,
    /// Rule in the cloud-managed rule engine, fired into a `cadence-worker`.
    External,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::InProcess => "in_process",
            TriggerSource::External => "external",
        }
    }
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TriggerSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "in_process" => Ok(TriggerSource::InProcess),
            "external" => Ok(TriggerSource::External),
            other => Err(format!("unknown trigger source: {other}")),
        }
    }
}

/// Lifecycle of a single ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Holds the per-key mutex until finalized.
    Running,
    Succeeded,
    Failed,
    /// Another run held the key when this trigger fired. Never executed.
    Skipped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "succeeded" => Ok(RunStatus::Succeeded),
            "failed" => Ok(RunStatus::Failed),
            "skipped" => Ok(RunStatus::Skipped),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// Why a run did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunErrorKind {
    /// The ingestion collaborator returned an error.
    Executor,
    /// The in-process timeout elapsed before the collaborator answered.
    Timeout,
    /// Another run held the key (only on `skipped` rows).
    Concurrent,
    /// A `running` row outlived the stale threshold; its process is gone.
    Abandoned,
}

impl RunErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunErrorKind::Executor => "executor",
            RunErrorKind::Timeout => "timeout",
            RunErrorKind::Concurrent => "concurrent",
            RunErrorKind::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for RunErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunErrorKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "executor" => Ok(RunErrorKind::Executor),
            "timeout" => Ok(RunErrorKind::Timeout),
            "concurrent" => Ok(RunErrorKind::Concurrent),
            "abandoned" => Ok(RunErrorKind::Abandoned),
            other => Err(format!("unknown run error kind: {other}")),
        }
    }
}

/// Identity of a schedule: one config, one timer, one rule, one mutex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScheduleKey {
    pub tenant_id: String,
    pub sync_type: SyncType,
}

impl ScheduleKey {
    pub fn new(tenant_id: impl Into<String>, sync_type: SyncType) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            sync_type,
        }
    }
}

impl fmt::Display for ScheduleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tenant_id, self.sync_type)
    }
}

/// Persisted per-tenant schedule. Disabled rather than deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantScheduleConfig {
    pub tenant_id: String,
    pub sync_type: SyncType,
    /// Cadence between runs, in seconds.
    pub interval_secs: u64,
    pub enabled: bool,
    /// The only trigger mechanism allowed to fire this schedule.
    pub active_trigger_source: TriggerSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TenantScheduleConfig {
    pub fn key(&self) -> ScheduleKey {
        ScheduleKey::new(self.tenant_id.clone(), self.sync_type)
    }

    pub fn interval(&self) -> Duration {
        i64::try_from(self.interval_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX)
    }

    /// Whether `source` should currently be firing this schedule.
    pub fn is_active_for(&self, source: TriggerSource) -> bool {
        self.enabled && self.active_trigger_source == source
    }
}

/// One row of the run ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRun {
    /// UUIDv7 string: time-sortable.
    pub run_id: String,
    pub tenant_id: String,
    pub sync_type: SyncType,
    pub trigger_source: TriggerSource,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub watermark_before: Option<String>,
    pub watermark_after: Option<String>,
    pub item_count: Option<u64>,
    pub error_kind: Option<RunErrorKind>,
    pub error_detail: Option<String>,
}

impl ScheduleRun {
    pub fn key(&self) -> ScheduleKey {
        ScheduleKey::new(self.tenant_id.clone(), self.sync_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_type_round_trips_through_str() {
        for t in SyncType::ALL {
            assert_eq!(t.as_str().parse::<SyncType>().unwrap(), t);
        }
        assert!("tickets".parse::<SyncType>().is_err());
    }

    #[test]
    fn enums_serialize_snake_case() {
        let json = serde_json::to_string(&TriggerSource::InProcess).unwrap();
        assert_eq!(json, r#""in_process""#);
        let json = serde_json::to_string(&RunStatus::Skipped).unwrap();
        assert_eq!(json, r#""skipped""#);
    }

    #[test]
    fn only_the_active_source_fires() {
        let now = Utc::now();
        let mut cfg = TenantScheduleConfig {
            tenant_id: "acme".into(),
            sync_type: SyncType::Ticket,
            interval_secs: 7200,
            enabled: true,
            active_trigger_source: TriggerSource::External,
            created_at: now,
            updated_at: now,
        };
        assert!(cfg.is_active_for(TriggerSource::External));
        assert!(!cfg.is_active_for(TriggerSource::InProcess));

        cfg.enabled = false;
        assert!(!cfg.is_active_for(TriggerSource::External));
        assert_eq!(cfg.interval(), Duration::hours(2));
        assert_eq!(cfg.key().to_string(), "acme:ticket");
    }
}
