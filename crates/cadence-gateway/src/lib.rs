//! `cadence-gateway`: process wiring for the scheduler.
//!
//! Two binaries share this library:
//!
//! * `cadence-gateway`: the HTTP administrative surface (`/schedules`,
//!   `/health`), the in-process trigger engine and the periodic sweep.
//! * `cadence-worker`: the execution unit an external rule invokes with
//!   `{tenant_id, sync_type}`; its exit code is the rule engine's only
//!   success signal.

pub mod app;
pub mod bootstrap;
pub mod http;
pub mod sweeper;
pub mod worker;
