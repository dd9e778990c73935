use std::sync::Arc;
use std::time::Duration;

use cadence_core::{RunErrorKind, ScheduleKey, ScheduleRun, TriggerSource};
use cadence_store::{RunLedger, RunOutcome};
use tracing::{error, info, warn};

use crate::error::{ExecutorError, Result};
use crate::ingestion::{IngestionClient, SyncOutput, SyncRequest};

/// Result of trying to take a key's run slot.
#[derive(Debug, Clone)]
pub enum Begin {
    /// A `running` row was inserted; the caller must [`SyncExecutor::complete`] it.
    Started(ScheduleRun),
    /// The key was held; a finished `skipped` row was appended instead.
    Skipped(ScheduleRun),
}

/// Wraps the ingestion collaborator with ledger bookkeeping.
///
/// Safe to share across tasks: all per-key exclusion lives in the ledger,
/// not here.
pub struct SyncExecutor {
    ledger: Arc<RunLedger>,
    client: Arc<dyn IngestionClient>,
    /// Applied to in-process runs only; external units have a platform timeout.
    run_timeout: Option<Duration>,
    error_detail_max: usize,
}

impl SyncExecutor {
    pub fn new(
        ledger: Arc<RunLedger>,
        client: Arc<dyn IngestionClient>,
        run_timeout: Option<Duration>,
        error_detail_max: usize,
    ) -> Self {
        Self {
            ledger,
            client,
            run_timeout,
            error_detail_max,
        }
    }

    pub fn ledger(&self) -> &Arc<RunLedger> {
        &self.ledger
    }

    /// Full unit of work: begin, execute, record.
    ///
    /// Returns the finalized ledger row. A skip is `Ok` with a `skipped` row.
    /// A failed sync is `Ok` with a `failed` row for in-process triggers and
    /// `Err` for external ones, whose exit status drives the rule engine's
    /// retry and alerting.
    pub async fn run(&self, key: &ScheduleKey, source: TriggerSource) -> Result<ScheduleRun> {
        match self.begin(key, source)? {
            Begin::Skipped(row) => Ok(row),
            Begin::Started(run) => self.complete(run).await,
        }
    }

    /// Resolve the resume watermark and take the key's `running` row.
    pub fn begin(&self, key: &ScheduleKey, source: TriggerSource) -> Result<Begin> {
        match self.ledger.record_run_start_resuming(key, source) {
            Ok(run) => Ok(Begin::Started(run)),
            Err(e) => match ExecutorError::from(e) {
                ExecutorError::ConcurrentRun { running_run_id, .. } => {
                    let detail = format!("run {running_run_id} already in progress");
                    let row = self.ledger.record_skipped(key, source, &detail)?;
                    info!(%key, %source, %running_run_id, "trigger skipped: key is held");
                    Ok(Begin::Skipped(row))
                }
                other => Err(other),
            },
        }
    }

    /// Delegate a started run to the collaborator and finalize its row.
    pub async fn complete(&self, run: ScheduleRun) -> Result<ScheduleRun> {
        let key = run.key();
        let source = run.trigger_source;
        let timeout = match source {
            TriggerSource::InProcess => self.run_timeout,
            TriggerSource::External => None,
        };

        let outcome = self
            .execute(&key, run.watermark_before.as_deref(), timeout)
            .await;

        let (record, failure) = match outcome {
            Ok(out) => {
                info!(
                    %key,
                    run_id = %run.run_id,
                    items = out.item_count,
                    watermark = %out.new_watermark,
                    "sync succeeded"
                );
                (
                    RunOutcome::Succeeded {
                        watermark: out.new_watermark,
                        item_count: out.item_count,
                    },
                    None,
                )
            }
            Err(e) => {
                let kind = match e {
                    ExecutorError::Timeout { .. } => RunErrorKind::Timeout,
                    _ => RunErrorKind::Executor,
                };
                warn!(%key, run_id = %run.run_id, error = %e, "sync failed");
                (
                    RunOutcome::Failed {
                        kind,
                        detail: truncate_detail(&e.to_string(), self.error_detail_max),
                    },
                    Some(e),
                )
            }
        };

        let finished = self
            .ledger
            .record_run_end(&run.run_id, &record)
            .map_err(|e| {
                error!(%key, run_id = %run.run_id, error = %e, "failed to record run end");
                ExecutorError::from(e)
            })?;

        match (failure, source) {
            (Some(e), TriggerSource::External) => Err(e),
            _ => Ok(finished),
        }
    }

    /// Raw collaborator call: `(tenant, sync_type, watermark) → (watermark', stats)`.
    pub async fn execute(
        &self,
        key: &ScheduleKey,
        watermark: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<SyncOutput> {
        let req = SyncRequest {
            tenant_id: key.tenant_id.clone(),
            sync_type: key.sync_type,
            since_watermark: watermark.map(str::to_string),
        };
        let call = self.client.run_incremental_sync(&req);
        let out = match timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| ExecutorError::Timeout {
                    secs: limit.as_secs(),
                })??,
            None => call.await?,
        };
        Ok(out)
    }
}

/// Cut `detail` to at most `max` characters, marking the cut.
pub fn truncate_detail(detail: &str, max: usize) -> String {
    if detail.chars().count() <= max {
        return detail.to_string();
    }
    let mut cut: String = detail.chars().take(max.saturating_sub(1)).collect();
    cut.push('…');
    cut
}
