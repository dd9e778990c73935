//! `cadence-store`: the two persisted stores behind the scheduler.
//!
//! * [`ScheduleStore`]: one row per `(tenant_id, sync_type)`, the single
//!   source of truth every trigger mechanism is rebuilt from.
//! * [`RunLedger`]: append-only history of sync attempts. Its partial
//!   unique index over `running` rows is the only lock in the system: it
//!   outlives any process and is shared by both trigger paths.
//!
//! Both wrap a [`SharedConnection`]; they may share one connection (tests)
//! or each get their own connection to the same file (gateway, worker).

pub mod db;
pub mod error;
pub mod ledger;
pub mod schedules;

pub use db::{init_db, open, open_in_memory, SharedConnection};
pub use error::{Result, StoreError};
pub use ledger::{RunLedger, RunOutcome};
pub use schedules::{ScheduleStore, ScheduleUpsert, UpsertOutcome};
