use cadence_core::{RunErrorKind, RunStatus, ScheduleKey, ScheduleRun, SyncType, TriggerSource};
use chrono::{DateTime, Utc};
use rusqlite::{params, ErrorCode, OptionalExtension, Row};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::db::{get_enum, get_opt_enum, get_opt_ts, get_ts, lock, now, ts, SharedConnection};
use crate::error::{Result, StoreError};

const SELECT_COLUMNS: &str = "SELECT run_id, tenant_id, sync_type, trigger_source, started_at,
        finished_at, status, watermark_before, watermark_after, item_count,
        error_kind, error_detail
     FROM schedule_runs";

/// How a `running` row ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded { watermark: String, item_count: u64 },
    Failed { kind: RunErrorKind, detail: String },
}

enum StartWatermark<'a> {
    Given(Option<&'a str>),
    /// Newest `succeeded` row's `watermark_after`, read inside the insert.
    Resume,
}

/// Append-only, persisted history of sync attempts.
///
/// Rows are inserted when a trigger fires and mutated exactly once when the
/// run finishes. Only the retention job deletes them.
pub struct RunLedger {
    conn: SharedConnection,
}

impl RunLedger {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    /// Insert a `running` row for `key`, taking the per-key mutex.
    ///
    /// Fails with [`StoreError::ConcurrentRun`] if a `running` row already
    /// exists, no matter which process or trigger source wrote it.
    pub fn record_run_start(
        &self,
        key: &ScheduleKey,
        source: TriggerSource,
        watermark_before: Option<&str>,
    ) -> Result<ScheduleRun> {
        self.record_run_start_at(key, source, watermark_before, now())
    }

    /// [`record_run_start`](Self::record_run_start) with an explicit start time.
    #[instrument(skip(self, watermark_before), fields(key = %key, %source))]
    pub fn record_run_start_at(
        &self,
        key: &ScheduleKey,
        source: TriggerSource,
        watermark_before: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<ScheduleRun> {
        self.insert_running(key, source, StartWatermark::Given(watermark_before), at)
    }

    /// Take the per-key mutex, resuming from the newest `succeeded` watermark.
    ///
    /// The watermark lookup and the insert are one statement, so a run that
    /// finishes concurrently is either visible to the lookup or still holds
    /// the key.
    pub fn record_run_start_resuming(
        &self,
        key: &ScheduleKey,
        source: TriggerSource,
    ) -> Result<ScheduleRun> {
        self.record_run_start_resuming_at(key, source, now())
    }

    #[instrument(skip(self), fields(key = %key, %source))]
    pub fn record_run_start_resuming_at(
        &self,
        key: &ScheduleKey,
        source: TriggerSource,
        at: DateTime<Utc>,
    ) -> Result<ScheduleRun> {
        self.insert_running(key, source, StartWatermark::Resume, at)
    }

    fn insert_running(
        &self,
        key: &ScheduleKey,
        source: TriggerSource,
        watermark: StartWatermark<'_>,
        at: DateTime<Utc>,
    ) -> Result<ScheduleRun> {
        let run_id = Uuid::now_v7().to_string();
        let db = lock(&self.conn)?;
        let inserted = match watermark {
            StartWatermark::Given(given) => db
                .execute(
                    "INSERT INTO schedule_runs
                     (run_id, tenant_id, sync_type, trigger_source, started_at, status,
                      watermark_before)
                     VALUES (?1, ?2, ?3, ?4, ?5, 'running', ?6)",
                    params![
                        run_id,
                        key.tenant_id,
                        key.sync_type.as_str(),
                        source.as_str(),
                        ts(at),
                        given,
                    ],
                )
                .map(|_| given.map(str::to_string)),
            StartWatermark::Resume => db.query_row(
                "INSERT INTO schedule_runs
                 (run_id, tenant_id, sync_type, trigger_source, started_at, status,
                  watermark_before)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'running',
                    (SELECT watermark_after FROM schedule_runs
                     WHERE tenant_id = ?2 AND sync_type = ?3 AND status = 'succeeded'
                     ORDER BY finished_at DESC, run_id DESC LIMIT 1))
                 RETURNING watermark_before",
                params![
                    run_id,
                    key.tenant_id,
                    key.sync_type.as_str(),
                    source.as_str(),
                    ts(at),
                ],
                |row| row.get::<_, Option<String>>(0),
            ),
        };

        let watermark_before = match inserted {
            Ok(w) => w,
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                let running_run_id: Option<String> = db
                    .query_row(
                        "SELECT run_id FROM schedule_runs
                         WHERE tenant_id = ?1 AND sync_type = ?2 AND status = 'running'",
                        params![key.tenant_id, key.sync_type.as_str()],
                        |row| row.get(0),
                    )
                    .optional()?;
                debug!(running = ?running_run_id, "run start refused: key is held");
                return Err(StoreError::ConcurrentRun {
                    key: key.to_string(),
                    running_run_id: running_run_id.unwrap_or_default(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        info!(%run_id, "run started");
        Ok(ScheduleRun {
            run_id,
            tenant_id: key.tenant_id.clone(),
            sync_type: key.sync_type,
            trigger_source: source,
            started_at: at,
            finished_at: None,
            status: RunStatus::Running,
            watermark_before,
            watermark_after: None,
            item_count: None,
            error_kind: None,
            error_detail: None,
        })
    }

    /// Append a finished `skipped` row: the trigger fired while `key` was held.
    pub fn record_skipped(
        &self,
        key: &ScheduleKey,
        source: TriggerSource,
        detail: &str,
    ) -> Result<ScheduleRun> {
        self.record_skipped_at(key, source, detail, now())
    }

    /// [`record_skipped`](Self::record_skipped) with an explicit fire time.
    #[instrument(skip(self, detail), fields(key = %key, %source))]
    pub fn record_skipped_at(
        &self,
        key: &ScheduleKey,
        source: TriggerSource,
        detail: &str,
        at: DateTime<Utc>,
    ) -> Result<ScheduleRun> {
        let run_id = Uuid::now_v7().to_string();
        let db = lock(&self.conn)?;
        db.execute(
            "INSERT INTO schedule_runs
             (run_id, tenant_id, sync_type, trigger_source, started_at, finished_at,
              status, error_kind, error_detail)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5, 'skipped', ?6, ?7)",
            params![
                run_id,
                key.tenant_id,
                key.sync_type.as_str(),
                source.as_str(),
                ts(at),
                RunErrorKind::Concurrent.as_str(),
                detail,
            ],
        )?;
        info!(%run_id, "run skipped");
        Ok(ScheduleRun {
            run_id,
            tenant_id: key.tenant_id.clone(),
            sync_type: key.sync_type,
            trigger_source: source,
            started_at: at,
            finished_at: Some(at),
            status: RunStatus::Skipped,
            watermark_before: None,
            watermark_after: None,
            item_count: None,
            error_kind: Some(RunErrorKind::Concurrent),
            error_detail: Some(detail.to_string()),
        })
    }

    /// Finalize a `running` row. Releases the per-key mutex.
    pub fn record_run_end(&self, run_id: &str, outcome: &RunOutcome) -> Result<ScheduleRun> {
        self.record_run_end_at(run_id, outcome, now())
    }

    /// [`record_run_end`](Self::record_run_end) with an explicit finish time.
    ///
    /// A row is finalized exactly once: a second call returns
    /// [`StoreError::AlreadyFinalized`] and leaves the row untouched.
    #[instrument(skip(self, outcome), fields(%run_id))]
    pub fn record_run_end_at(
        &self,
        run_id: &str,
        outcome: &RunOutcome,
        at: DateTime<Utc>,
    ) -> Result<ScheduleRun> {
        let (status, watermark, item_count, kind, detail) = match outcome {
            RunOutcome::Succeeded {
                watermark,
                item_count,
            } => (
                RunStatus::Succeeded,
                Some(watermark.as_str()),
                Some(*item_count as i64),
                None,
                None,
            ),
            RunOutcome::Failed { kind, detail } => (
                RunStatus::Failed,
                None,
                None,
                Some(kind.as_str()),
                Some(detail.as_str()),
            ),
        };

        let db = lock(&self.conn)?;
        let n = db.execute(
            "UPDATE schedule_runs
             SET status = ?1, finished_at = ?2, watermark_after = ?3, item_count = ?4,
                 error_kind = ?5, error_detail = ?6
             WHERE run_id = ?7 AND status = 'running'",
            params![status.as_str(), ts(at), watermark, item_count, kind, detail, run_id],
        )?;

        let row = db
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE run_id = ?1"),
                params![run_id],
                row_to_run,
            )
            .optional()?;
        let row = row.ok_or_else(|| StoreError::RunNotFound {
            run_id: run_id.to_string(),
        })?;

        if n == 0 {
            warn!(current = %row.status, "run end refused: row already finalized");
            return Err(StoreError::AlreadyFinalized {
                run_id: run_id.to_string(),
                status: row.status.to_string(),
            });
        }
        info!(status = %row.status, "run finished");
        Ok(row)
    }

    /// Finalize every `running` row started before `started_before` as
    /// `failed`/`abandoned`. Such rows belong to processes that died mid-run;
    /// leaving them would hold the key forever.
    #[instrument(skip(self))]
    pub fn fail_stale_runs(&self, started_before: DateTime<Utc>) -> Result<usize> {
        let db = lock(&self.conn)?;
        let n = db.execute(
            "UPDATE schedule_runs
             SET status = 'failed', finished_at = ?1, error_kind = ?2,
                 error_detail = 'run outlived the stale threshold; owning process presumed dead'
             WHERE status = 'running' AND started_at < ?3",
            params![ts(now()), RunErrorKind::Abandoned.as_str(), ts(started_before)],
        )?;
        if n > 0 {
            warn!(count = n, "stale running rows marked abandoned");
        }
        Ok(n)
    }

    /// Retention: delete finished rows that ended before `cutoff`.
    ///
    /// Never touches `running` rows, and always keeps the newest `succeeded`
    /// row of each key since that row carries the resume watermark.
    #[instrument(skip(self))]
    pub fn prune_finished_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let db = lock(&self.conn)?;
        let n = db.execute(
            "DELETE FROM schedule_runs
             WHERE status != 'running'
               AND finished_at IS NOT NULL
               AND finished_at < ?1
               AND run_id NOT IN (
                   SELECT r.run_id FROM schedule_runs r
                   WHERE r.status = 'succeeded'
                     AND r.finished_at = (
                         SELECT MAX(r2.finished_at) FROM schedule_runs r2
                         WHERE r2.tenant_id = r.tenant_id
                           AND r2.sync_type = r.sync_type
                           AND r2.status = 'succeeded'
                     )
               )",
            params![ts(cutoff)],
        )?;
        if n > 0 {
            info!(count = n, "ledger rows pruned");
        }
        Ok(n)
    }

    /// Retrieve one row by ID.
    pub fn get_run(&self, run_id: &str) -> Result<Option<ScheduleRun>> {
        self.query_one(
            &format!("{SELECT_COLUMNS} WHERE run_id = ?1"),
            params![run_id],
        )
    }

    /// The row currently holding `key`, if any.
    pub fn running_run(&self, key: &ScheduleKey) -> Result<Option<ScheduleRun>> {
        self.query_one(
            &format!(
                "{SELECT_COLUMNS}
                 WHERE tenant_id = ?1 AND sync_type = ?2 AND status = 'running'"
            ),
            params![key.tenant_id, key.sync_type.as_str()],
        )
    }

    /// Newest `succeeded` row of `key`: the resume watermark and the anchor
    /// for the next in-process fire.
    pub fn last_successful_run(&self, key: &ScheduleKey) -> Result<Option<ScheduleRun>> {
        self.query_one(
            &format!(
                "{SELECT_COLUMNS}
                 WHERE tenant_id = ?1 AND sync_type = ?2 AND status = 'succeeded'
                 ORDER BY finished_at DESC, run_id DESC LIMIT 1"
            ),
            params![key.tenant_id, key.sync_type.as_str()],
        )
    }

    /// Most recent attempt of any status.
    pub fn last_run(&self, key: &ScheduleKey) -> Result<Option<ScheduleRun>> {
        self.query_one(
            &format!(
                "{SELECT_COLUMNS}
                 WHERE tenant_id = ?1 AND sync_type = ?2
                 ORDER BY started_at DESC, run_id DESC LIMIT 1"
            ),
            params![key.tenant_id, key.sync_type.as_str()],
        )
    }

    /// Most recent rows of a tenant, newest first, optionally for one sync type.
    pub fn recent_runs(
        &self,
        tenant_id: &str,
        sync_type: Option<SyncType>,
        limit: usize,
    ) -> Result<Vec<ScheduleRun>> {
        let db = lock(&self.conn)?;
        let mut stmt = db.prepare(&format!(
            "{SELECT_COLUMNS}
             WHERE tenant_id = ?1 AND (?2 IS NULL OR sync_type = ?2)
             ORDER BY started_at DESC, run_id DESC
             LIMIT ?3"
        ))?;
        let rows = stmt.query_map(
            params![tenant_id, sync_type.map(|t| t.as_str()), limit as i64],
            row_to_run,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn query_one(&self, sql: &str, params: impl rusqlite::Params) -> Result<Option<ScheduleRun>> {
        let db = lock(&self.conn)?;
        Ok(db.query_row(sql, params, row_to_run).optional()?)
    }
}

/// Map a SQLite row to a `ScheduleRun`.
fn row_to_run(row: &Row<'_>) -> rusqlite::Result<ScheduleRun> {
    Ok(ScheduleRun {
        run_id: row.get(0)?,
        tenant_id: row.get(1)?,
        sync_type: get_enum(row, 2)?,
        trigger_source: get_enum(row, 3)?,
        started_at: get_ts(row, 4)?,
        finished_at: get_opt_ts(row, 5)?,
        status: get_enum(row, 6)?,
        watermark_before: row.get(7)?,
        watermark_after: row.get(8)?,
        item_count: row.get::<_, Option<i64>>(9)?.map(|n| n.max(0) as u64),
        error_kind: get_opt_enum(row, 10)?,
        error_detail: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::db::{init_db, memory};
    use chrono::Duration;
    use rusqlite::Connection;

    fn acme() -> ScheduleKey {
        ScheduleKey::new("acme", SyncType::Ticket)
    }

    fn succeeded(w: &str) -> RunOutcome {
        RunOutcome::Succeeded {
            watermark: w.to_string(),
            item_count: 3,
        }
    }

    #[test]
    fn second_start_is_refused_until_the_first_ends() {
        let ledger = RunLedger::new(memory());
        let first = ledger
            .record_run_start(&acme(), TriggerSource::InProcess, None)
            .unwrap();

        match ledger.record_run_start(&acme(), TriggerSource::External, None) {
            Err(StoreError::ConcurrentRun { running_run_id, .. }) => {
                assert_eq!(running_run_id, first.run_id)
            }
            other => panic!("expected ConcurrentRun, got {other:?}"),
        }

        // other keys are unaffected
        ledger
            .record_run_start(
                &ScheduleKey::new("acme", SyncType::Article),
                TriggerSource::InProcess,
                None,
            )
            .unwrap();

        ledger.record_run_end(&first.run_id, &succeeded("w1")).unwrap();
        ledger
            .record_run_start(&acme(), TriggerSource::External, Some("w1"))
            .unwrap();
    }

    #[test]
    fn mutex_holds_across_connections() {
        // Two handles on one database stand in for two processes.
        let uri = "file:ledger_mutex_across_connections?mode=memory&cache=shared";
        let a = Connection::open(uri).unwrap();
        init_db(&a).unwrap();
        let b = Connection::open(uri).unwrap();
        let gateway = RunLedger::new(Arc::new(Mutex::new(a)));
        let worker = RunLedger::new(Arc::new(Mutex::new(b)));

        gateway
            .record_run_start(&acme(), TriggerSource::InProcess, None)
            .unwrap();
        let refused = worker.record_run_start(&acme(), TriggerSource::External, None);
        assert!(matches!(refused, Err(StoreError::ConcurrentRun { .. })));
    }

    #[test]
    fn resuming_start_reads_the_watermark_it_inserts_with() {
        let ledger = RunLedger::new(memory());
        let first = ledger
            .record_run_start_resuming(&acme(), TriggerSource::InProcess)
            .unwrap();
        assert_eq!(first.watermark_before, None);

        // still held: no second row, however the watermark is resolved
        assert!(matches!(
            ledger.record_run_start_resuming(&acme(), TriggerSource::External),
            Err(StoreError::ConcurrentRun { .. })
        ));

        ledger.record_run_end(&first.run_id, &succeeded("w1")).unwrap();
        let second = ledger
            .record_run_start_resuming(&acme(), TriggerSource::External)
            .unwrap();
        assert_eq!(second.watermark_before.as_deref(), Some("w1"));
        let stored = ledger.get_run(&second.run_id).unwrap().unwrap();
        assert_eq!(stored.watermark_before.as_deref(), Some("w1"));
    }

    #[test]
    fn a_run_ends_exactly_once() {
        let ledger = RunLedger::new(memory());
        let run = ledger
            .record_run_start(&acme(), TriggerSource::InProcess, Some("w0"))
            .unwrap();
        let done = ledger.record_run_end(&run.run_id, &succeeded("w1")).unwrap();
        assert_eq!(done.status, RunStatus::Succeeded);
        assert_eq!(done.watermark_before.as_deref(), Some("w0"));
        assert_eq!(done.watermark_after.as_deref(), Some("w1"));
        assert_eq!(done.item_count, Some(3));

        let again = ledger.record_run_end(
            &run.run_id,
            &RunOutcome::Failed {
                kind: RunErrorKind::Executor,
                detail: "late".into(),
            },
        );
        assert!(matches!(again, Err(StoreError::AlreadyFinalized { .. })));
        let row = ledger.get_run(&run.run_id).unwrap().unwrap();
        assert_eq!(row.status, RunStatus::Succeeded);

        assert!(matches!(
            ledger.record_run_end("missing", &succeeded("x")),
            Err(StoreError::RunNotFound { .. })
        ));
    }

    #[test]
    fn skipped_rows_never_hold_the_key() {
        let ledger = RunLedger::new(memory());
        let run = ledger
            .record_run_start(&acme(), TriggerSource::InProcess, None)
            .unwrap();
        let skipped = ledger
            .record_skipped(&acme(), TriggerSource::InProcess, "held by another run")
            .unwrap();
        assert_eq!(skipped.status, RunStatus::Skipped);
        assert_eq!(skipped.error_kind, Some(RunErrorKind::Concurrent));

        let held = ledger.running_run(&acme()).unwrap().unwrap();
        assert_eq!(held.run_id, run.run_id);
    }

    #[test]
    fn last_successful_run_ignores_failures() {
        let ledger = RunLedger::new(memory());
        let t0 = now() - Duration::hours(10);

        let r1 = ledger
            .record_run_start_at(&acme(), TriggerSource::InProcess, None, t0)
            .unwrap();
        ledger
            .record_run_end_at(&r1.run_id, &succeeded("w1"), t0 + Duration::minutes(5))
            .unwrap();

        let r2 = ledger
            .record_run_start_at(&acme(), TriggerSource::InProcess, Some("w1"), t0 + Duration::hours(2))
            .unwrap();
        ledger
            .record_run_end_at(
                &r2.run_id,
                &RunOutcome::Failed {
                    kind: RunErrorKind::Timeout,
                    detail: "timed out".into(),
                },
                t0 + Duration::hours(3),
            )
            .unwrap();

        let last_ok = ledger.last_successful_run(&acme()).unwrap().unwrap();
        assert_eq!(last_ok.run_id, r1.run_id);
        assert_eq!(last_ok.finished_at, Some(t0 + Duration::minutes(5)));

        let last = ledger.last_run(&acme()).unwrap().unwrap();
        assert_eq!(last.run_id, r2.run_id);
        assert_eq!(last.error_kind, Some(RunErrorKind::Timeout));

        let recent = ledger.recent_runs("acme", None, 10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].run_id, r2.run_id);
        assert!(ledger
            .recent_runs("acme", Some(SyncType::Article), 10)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn stale_runs_release_the_key() {
        let ledger = RunLedger::new(memory());
        let long_ago = now() - Duration::hours(12);
        ledger
            .record_run_start_at(&acme(), TriggerSource::External, None, long_ago)
            .unwrap();

        assert_eq!(ledger.fail_stale_runs(now() - Duration::hours(6)).unwrap(), 1);
        let last = ledger.last_run(&acme()).unwrap().unwrap();
        assert_eq!(last.status, RunStatus::Failed);
        assert_eq!(last.error_kind, Some(RunErrorKind::Abandoned));
        assert!(ledger.running_run(&acme()).unwrap().is_none());

        ledger
            .record_run_start(&acme(), TriggerSource::InProcess, None)
            .unwrap();
        // a fresh run is not stale
        assert_eq!(ledger.fail_stale_runs(now() - Duration::hours(6)).unwrap(), 0);
    }

    #[test]
    fn pruning_keeps_the_watermark_row() {
        let ledger = RunLedger::new(memory());
        let old = now() - Duration::days(200);

        let mut last_ok = String::new();
        for i in 0..3 {
            let at = old + Duration::hours(i);
            let run = ledger
                .record_run_start_at(&acme(), TriggerSource::InProcess, None, at)
                .unwrap();
            ledger
                .record_run_end_at(&run.run_id, &succeeded(&format!("w{i}")), at + Duration::minutes(1))
                .unwrap();
            last_ok = run.run_id;
        }
        ledger
            .record_skipped_at(&acme(), TriggerSource::InProcess, "held", old + Duration::hours(5))
            .unwrap();

        let pruned = ledger.prune_finished_before(now() - Duration::days(90)).unwrap();
        assert_eq!(pruned, 3);
        let remaining = ledger.recent_runs("acme", None, 10).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].run_id, last_ok);
        assert_eq!(remaining[0].watermark_after.as_deref(), Some("w2"));
    }
}
