use std::collections::BTreeMap;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::types::TriggerSource;

pub const DEFAULT_PORT: u16 = 18790;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_RULE_PREFIX: &str = "cadence";
/// Floor on any persisted interval: sub-minute precision is not offered.
pub const MIN_INTERVAL_FLOOR_SECS: u64 = 60;

/// Top-level config (cadence.toml + CADENCE_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CadenceConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub rules: RulesConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

/// Bearer tokens for the administrative surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Grants access to every tenant plus the operator-only routes.
    pub operator_token: Option<String>,
    /// tenant_id → token. A tenant token only ever opens its own tenant.
    #[serde(default)]
    pub tenant_tokens: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    /// SQLite busy timeout; several connections share the file.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

/// In-process trigger engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Upper bound on a single sleep of the engine loop.
    #[serde(default = "default_max_sleep_secs")]
    pub max_sleep_secs: u64,
    /// Hard timeout around each in-process executor call.
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
    /// Window over which overdue schedules are spread after a restart.
    #[serde(default = "default_catchup_spread_secs")]
    pub catchup_spread_secs: u64,
    /// Delay before re-firing after the ledger was unreachable.
    #[serde(default = "default_persistence_backoff_secs")]
    pub persistence_backoff_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_sleep_secs: default_max_sleep_secs(),
            run_timeout_secs: default_run_timeout_secs(),
            catchup_spread_secs: default_catchup_spread_secs(),
            persistence_backoff_secs: default_persistence_backoff_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleBackend {
    /// Process-local rule table; for development and single-node setups.
    #[default]
    Memory,
    /// Remote rule engine speaking the REST contract in `cadence-rules`.
    Http,
}

/// What happens to the external rule of a disabled schedule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleRemoval {
    #[default]
    Disable,
    Delete,
}

/// External trigger adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub backend: RuleBackend,
    pub endpoint: Option<String>,
    pub api_token: Option<String>,
    /// Execution-unit reference every rule fires (e.g. a task definition ARN).
    #[serde(default = "default_rule_target")]
    pub target: String,
    /// Namespace for rule names; only rules with this prefix are managed.
    #[serde(default = "default_rule_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub on_disable: RuleRemoval,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            backend: RuleBackend::default(),
            endpoint: None,
            api_token: None,
            target: default_rule_target(),
            prefix: default_rule_prefix(),
            on_disable: RuleRemoval::default(),
        }
    }
}

/// Ingestion collaborator (the service that actually moves tenant data).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    #[serde(default = "default_ingestion_endpoint")]
    pub endpoint: String,
    pub api_token: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_ingestion_endpoint(),
            api_token: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Validation bounds applied by the controller before anything is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: u64,
    #[serde(default = "default_max_interval_secs")]
    pub max_interval_secs: u64,
    #[serde(default)]
    pub default_trigger_source: TriggerSource,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: default_min_interval_secs(),
            max_interval_secs: default_max_interval_secs(),
            default_trigger_source: TriggerSource::default(),
        }
    }
}

/// Run ledger housekeeping and reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// A `running` row older than this belonged to a dead process.
    #[serde(default = "default_stale_run_after_secs")]
    pub stale_run_after_secs: u64,
    /// Finished rows older than this are pruned. 0 keeps everything.
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Longest error detail stored on a failed row, in characters.
    #[serde(default = "default_error_detail_max")]
    pub error_detail_max: usize,
    /// Rows returned per sync type by the status endpoint.
    #[serde(default = "default_status_run_limit")]
    pub status_run_limit: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            stale_run_after_secs: default_stale_run_after_secs(),
            retention_days: default_retention_days(),
            sweep_interval_secs: default_sweep_interval_secs(),
            error_detail_max: default_error_detail_max(),
            status_run_limit: default_status_run_limit(),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence/cadence.db", home)
}
fn default_busy_timeout_ms() -> u64 {
    5_000
}
fn default_max_sleep_secs() -> u64 {
    60
}
fn default_run_timeout_secs() -> u64 {
    30 * 60
}
fn default_catchup_spread_secs() -> u64 {
    5 * 60
}
fn default_persistence_backoff_secs() -> u64 {
    60
}
fn default_rule_target() -> String {
    "cadence-worker".to_string()
}
fn default_rule_prefix() -> String {
    DEFAULT_RULE_PREFIX.to_string()
}
fn default_ingestion_endpoint() -> String {
    "http://localhost:8080".to_string()
}
fn default_request_timeout_secs() -> u64 {
    25 * 60
}
fn default_min_interval_secs() -> u64 {
    15 * 60
}
fn default_max_interval_secs() -> u64 {
    7 * 24 * 3600
}
fn default_stale_run_after_secs() -> u64 {
    6 * 3600
}
fn default_retention_days() -> u64 {
    90
}
fn default_sweep_interval_secs() -> u64 {
    5 * 60
}
fn default_error_detail_max() -> usize {
    2_000
}
fn default_status_run_limit() -> usize {
    10
}

impl CadenceConfig {
    /// Load config from a TOML file with CADENCE_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.cadence/cadence.toml
    ///
    /// A missing file is not an error; defaults fill every gap.
    /// Nested keys use a double underscore: `CADENCE_GATEWAY__PORT=9000`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: CadenceConfig = Figment::from(Serialized::defaults(CadenceConfig::default()))
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CADENCE_").split("__"))
            .extract()
            .map_err(|e| crate::error::CadenceError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject combinations that would make the system misbehave at runtime.
    pub fn validate(&self) -> crate::error::Result<()> {
        let limits = &self.limits;
        if limits.min_interval_secs < MIN_INTERVAL_FLOOR_SECS {
            return Err(crate::error::CadenceError::Config(format!(
                "limits.min_interval_secs must be at least {MIN_INTERVAL_FLOOR_SECS}"
            )));
        }
        if limits.max_interval_secs < limits.min_interval_secs {
            return Err(crate::error::CadenceError::Config(
                "limits.max_interval_secs must not be below limits.min_interval_secs".to_string(),
            ));
        }
        // A sweep must never release the key of a run that is still executing.
        let stale_after = self.ledger.stale_run_after_secs;
        if stale_after == 0 {
            return Err(crate::error::CadenceError::Config(
                "ledger.stale_run_after_secs must be positive".to_string(),
            ));
        }
        let run_timeout = self.scheduler.run_timeout_secs;
        if run_timeout > 0 && stale_after <= run_timeout {
            return Err(crate::error::CadenceError::Config(format!(
                "ledger.stale_run_after_secs ({stale_after}) must exceed scheduler.run_timeout_secs ({run_timeout})"
            )));
        }
        if self.rules.enabled
            && self.rules.backend == RuleBackend::Http
            && self.rules.endpoint.is_none()
        {
            return Err(crate::error::CadenceError::Config(
                "rules.endpoint is required for the http rule backend".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence/cadence.toml", home)
}
