//! `cadence-scheduler`: the in-process trigger engine.
//!
//! # Overview
//!
//! One slot per enabled `(tenant_id, sync_type)` whose active trigger source
//! is `in_process`. Slots are rehydrated from the schedule store on start and
//! on every reconciliation; nothing about a schedule lives only in memory.
//!
//! The [`engine::TriggerEngine`] loop sleeps until the earliest armed slot is
//! due, fires it on its own task and goes back to sleep. Each slot walks an
//! explicit state machine:
//!
//! | From        | To          | When                                        |
//! |-------------|-------------|---------------------------------------------|
//! | `idle`      | `armed`     | next fire computed                          |
//! | `armed`     | `firing`    | next fire reached                           |
//! | `firing`    | `executing` | ledger accepted the `running` row           |
//! | `firing`    | `skipped`   | another run holds the key                   |
//! | `executing` | `idle`      | run finalized; immediately re-armed         |
//! | `skipped`   | `firing`    | next fire reached                           |
//!
//! Next fire is anchored on the ledger (last successful run end, schedule
//! creation, last attempt), never on process start time.

pub mod engine;
pub mod error;
pub mod schedule;
pub mod table;
pub mod types;

pub use engine::{load_anchors, EngineHandle, TriggerEngine};
pub use error::{Result, SchedulerError};
pub use schedule::{catchup_offset, compute_next_fire, FireAnchors};
pub use table::{Fire, SlotChange, TriggerTable};
pub use types::{SlotSnapshot, TriggerState};
