//! `cadence-executor`: the idempotent unit of work behind every trigger.
//!
//! [`SyncExecutor::run`] is "run an incremental sync for this tenant and
//! sync type": it resumes from the last successful watermark in the ledger,
//! takes the ledger's per-key mutex, delegates to the [`IngestionClient`],
//! and writes the outcome back. Both trigger mechanisms call it; only the
//! error-propagation policy differs by [`TriggerSource`](cadence_core::TriggerSource).

pub mod error;
pub mod executor;
pub mod ingestion;

pub use error::{ExecutorError, IngestionError, Result};
pub use executor::{truncate_detail, Begin, SyncExecutor};
pub use ingestion::{HttpIngestionClient, IngestionClient, SyncOutput, SyncRequest};
