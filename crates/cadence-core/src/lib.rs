//! `cadence-core`: shared vocabulary for the incremental-sync scheduler.
//!
//! Every other crate in the workspace speaks in terms of the types defined
//! here: the `(tenant_id, sync_type)` schedule key, the persisted schedule
//! and run records, the figment-backed [`config::CadenceConfig`], and the
//! [`reconcile::TriggerReconciler`] seam that both trigger mechanisms
//! implement so the controller can drive them uniformly.

pub mod config;
pub mod error;
pub mod reconcile;
pub mod types;

pub use error::{CadenceError, Result};
pub use reconcile::{ReconcileFailure, ReconcileSummary, TriggerReconciler};
pub use types::{
    RunErrorKind, RunStatus, ScheduleKey, ScheduleRun, SyncType, TenantScheduleConfig,
    TriggerSource,
};
