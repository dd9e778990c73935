use std::collections::BTreeMap;
use std::sync::Arc;

use cadence_core::config::{LedgerConfig, LimitsConfig};
use cadence_core::{SyncType, TenantScheduleConfig, TriggerReconciler};
use cadence_scheduler::{compute_next_fire, load_anchors, EngineHandle, SlotSnapshot};
use cadence_store::{RunLedger, ScheduleStore, ScheduleUpsert};
use chrono::{DateTime, Duration, Utc};
use tracing::{info, instrument, warn};

use crate::caller::Caller;
use crate::error::{ControllerError, Result};
use crate::types::{
    MechanismReport, ScheduleChange, ScheduleHealth, ScheduleRequest, ScheduleStatus,
    SweepReport, TenantStatus,
};

const MAX_TENANT_ID_LEN: usize = 128;

/// Tenant-scoped schedule administration.
///
/// The schedule store is written first; trigger mechanisms are reconciled
/// afterwards and their failures are reported, never rolled back: the next
/// sweep heals them from the store.
pub struct ScheduleController {
    store: Arc<ScheduleStore>,
    ledger: Arc<RunLedger>,
    reconcilers: Vec<Arc<dyn TriggerReconciler>>,
    engine: Option<EngineHandle>,
    limits: LimitsConfig,
    ledger_config: LedgerConfig,
}

impl ScheduleController {
    pub fn new(
        store: Arc<ScheduleStore>,
        ledger: Arc<RunLedger>,
        limits: LimitsConfig,
        ledger_config: LedgerConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            reconcilers: Vec::new(),
            engine: None,
            limits,
            ledger_config,
        }
    }

    /// Register the in-process engine: reconciled like any mechanism, and
    /// consulted for trigger state in status responses.
    pub fn with_engine(mut self, handle: EngineHandle) -> Self {
        self.reconcilers.push(Arc::new(handle.clone()));
        self.engine = Some(handle);
        self
    }

    pub fn with_reconciler(mut self, reconciler: Arc<dyn TriggerReconciler>) -> Self {
        self.reconcilers.push(reconciler);
        self
    }

    /// Names of the registered trigger mechanisms, in reconcile order.
    pub fn mechanisms(&self) -> Vec<String> {
        self.reconcilers.iter().map(|r| r.name().to_string()).collect()
    }

    pub fn engine(&self) -> Option<&EngineHandle> {
        self.engine.as_ref()
    }

    /// Validate, persist, then reconcile every mechanism.
    #[instrument(skip(self, req), fields(tenant_id = %req.tenant_id, sync_type = %req.sync_type))]
    pub async fn create_or_update_schedule(
        &self,
        caller: &Caller,
        req: &ScheduleRequest,
    ) -> Result<ScheduleChange> {
        caller.authorize(&req.tenant_id)?;
        validate_tenant_id(&req.tenant_id)?;
        let interval_secs = self.interval_secs(req.interval_hours)?;

        let upsert = ScheduleUpsert {
            interval_secs,
            enabled: req.enabled,
            active_trigger_source: req
                .trigger_source
                .unwrap_or(self.limits.default_trigger_source),
        };
        let outcome = self
            .store
            .upsert_schedule(&req.tenant_id, req.sync_type, &upsert)?;
        let reconciliation = self.reconcile_all().await;

        Ok(ScheduleChange {
            schedule: outcome.current,
            previous: outcome.previous,
            reconciliation,
        })
    }

    /// Disable the tenant's schedule for `sync_type`, or all of them when
    /// `None`, and reconcile. In-flight runs finish and are still recorded.
    #[instrument(skip(self), fields(%tenant_id))]
    pub async fn delete_schedule(
        &self,
        caller: &Caller,
        tenant_id: &str,
        sync_type: Option<SyncType>,
    ) -> Result<Vec<TenantScheduleConfig>> {
        caller.authorize(tenant_id)?;
        let disabled = self.store.disable(tenant_id, sync_type)?;
        if disabled.is_empty() {
            return Err(ControllerError::NotFound {
                tenant_id: tenant_id.to_string(),
            });
        }
        self.reconcile_all().await;
        Ok(disabled)
    }

    /// Config, recent runs and next-fire estimate of each of the tenant's
    /// schedules.
    pub fn get_status(&self, caller: &Caller, tenant_id: &str) -> Result<TenantStatus> {
        caller.authorize(tenant_id)?;
        let configs = self.store.list_for_tenant(tenant_id)?;
        if configs.is_empty() {
            return Err(ControllerError::NotFound {
                tenant_id: tenant_id.to_string(),
            });
        }

        let now = Utc::now();
        let mut schedules = Vec::with_capacity(configs.len());
        for config in configs {
            let key = config.key();
            let trigger = self.engine.as_ref().and_then(|e| e.state(&key));
            let next_fire_estimate = self.next_fire_estimate(&config, trigger.as_ref(), now)?;
            let last_runs = self.ledger.recent_runs(
                tenant_id,
                Some(config.sync_type),
                self.ledger_config.status_run_limit,
            )?;
            schedules.push(ScheduleStatus {
                config,
                last_runs,
                next_fire_estimate,
                trigger,
            });
        }

        Ok(TenantStatus {
            tenant_id: tenant_id.to_string(),
            schedules,
        })
    }

    /// Operator health view: every tenant's configs and last outcome.
    pub fn list_all(&self, caller: &Caller) -> Result<BTreeMap<String, Vec<ScheduleHealth>>> {
        caller.require_operator()?;
        let mut view: BTreeMap<String, Vec<ScheduleHealth>> = BTreeMap::new();
        for config in self.store.list_all()? {
            let last_run = self.ledger.last_run(&config.key())?;
            view.entry(config.tenant_id.clone())
                .or_default()
                .push(ScheduleHealth {
                    sync_type: config.sync_type,
                    enabled: config.enabled,
                    interval_secs: config.interval_secs,
                    active_trigger_source: config.active_trigger_source,
                    last_run,
                });
        }
        Ok(view)
    }

    /// Operator-triggered housekeeping sweep.
    pub async fn reconcile(&self, caller: &Caller) -> Result<SweepReport> {
        caller.require_operator()?;
        self.sweep().await
    }

    pub async fn sweep(&self) -> Result<SweepReport> {
        self.sweep_at(Utc::now()).await
    }

    /// Release stale runs, apply retention, then reconcile every mechanism.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let stale_after = seconds(self.ledger_config.stale_run_after_secs);
        let stale_failed = self.ledger.fail_stale_runs(before(now, stale_after))?;

        let pruned = match self.ledger_config.retention_days {
            0 => 0,
            days => {
                let retention = seconds(days.saturating_mul(86_400));
                self.ledger.prune_finished_before(before(now, retention))?
            }
        };

        let reconciliation = self.reconcile_all().await;
        info!(stale_failed, pruned, "sweep finished");
        Ok(SweepReport {
            stale_failed,
            pruned,
            reconciliation,
        })
    }

    /// Reconcile every registered mechanism. A failing mechanism is reported
    /// and the others still run.
    pub async fn reconcile_all(&self) -> Vec<MechanismReport> {
        let mut reports = Vec::with_capacity(self.reconcilers.len());
        for reconciler in &self.reconcilers {
            let mechanism = reconciler.name().to_string();
            match reconciler.reconcile().await {
                Ok(summary) => reports.push(MechanismReport {
                    mechanism,
                    summary: Some(summary),
                    error: None,
                }),
                Err(e) => {
                    warn!(%mechanism, error = %e, "reconciliation failed; retried on next sweep");
                    reports.push(MechanismReport {
                        mechanism,
                        summary: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        reports
    }

    fn interval_secs(&self, hours: f64) -> Result<u64> {
        if !hours.is_finite() || hours <= 0.0 {
            return Err(ControllerError::Validation(format!(
                "interval_hours must be a positive number, got {hours}"
            )));
        }
        let secs = (hours * 3600.0).round();
        let (min, max) = (self.limits.min_interval_secs, self.limits.max_interval_secs);
        if secs < min as f64 || secs > max as f64 {
            return Err(ControllerError::Validation(format!(
                "interval of {secs}s is outside the allowed range [{min}s, {max}s]"
            )));
        }
        Ok(secs as u64)
    }

    fn next_fire_estimate(
        &self,
        config: &TenantScheduleConfig,
        trigger: Option<&SlotSnapshot>,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        if !config.enabled {
            return Ok(None);
        }
        if let Some(slot) = trigger {
            return Ok(slot.next_fire);
        }
        let anchors = load_anchors(&self.ledger, &config.key())?;
        Ok(Some(compute_next_fire(config, &anchors, now, Duration::zero())))
    }
}

fn validate_tenant_id(tenant_id: &str) -> Result<()> {
    if tenant_id.is_empty() || tenant_id.len() > MAX_TENANT_ID_LEN {
        return Err(ControllerError::Validation(format!(
            "tenant_id must be 1 to {MAX_TENANT_ID_LEN} characters"
        )));
    }
    if !tenant_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(ControllerError::Validation(format!(
            "tenant_id {tenant_id:?} may only contain letters, digits, '-', '_' and '.'"
        )));
    }
    Ok(())
}

fn seconds(secs: u64) -> Duration {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

fn before(now: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(by).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use async_trait::async_trait;
    use cadence_core::{CadenceError, ReconcileSummary, RunStatus, ScheduleKey, TriggerSource};
    use cadence_store::RunOutcome;

    /// Reconciler fake that counts passes and can be made to fail.
    struct Recording {
        name: &'static str,
        calls: AtomicUsize,
        fail: bool,
    }

    impl Recording {
        fn new(name: &'static str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: AtomicUsize::new(0),
                fail,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TriggerReconciler for Recording {
        fn name(&self) -> &str {
            self.name
        }

        fn source(&self) -> TriggerSource {
            TriggerSource::External
        }

        async fn reconcile(&self) -> cadence_core::Result<ReconcileSummary> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CadenceError::Reconciliation {
                    mechanism: self.name.to_string(),
                    reason: "rule engine unreachable".into(),
                });
            }
            Ok(ReconcileSummary::new(self.name))
        }
    }

    struct Fixture {
        controller: ScheduleController,
        store: Arc<ScheduleStore>,
        ledger: Arc<RunLedger>,
        rec: Arc<Recording>,
    }

    fn fixture() -> Fixture {
        let conn = cadence_store::open_in_memory().unwrap();
        let store = Arc::new(ScheduleStore::new(conn.clone()));
        let ledger = Arc::new(RunLedger::new(conn));
        let rec = Recording::new("recording", false);
        let controller = ScheduleController::new(
            store.clone(),
            ledger.clone(),
            LimitsConfig::default(),
            LedgerConfig::default(),
        )
        .with_reconciler(rec.clone());
        Fixture {
            controller,
            store,
            ledger,
            rec,
        }
    }

    fn request(tenant: &str, hours: f64) -> ScheduleRequest {
        ScheduleRequest {
            tenant_id: tenant.into(),
            sync_type: SyncType::Ticket,
            interval_hours: hours,
            enabled: true,
            trigger_source: Some(TriggerSource::External),
        }
    }

    #[tokio::test]
    async fn zero_interval_is_rejected_before_persistence() {
        let fx = fixture();
        let err = fx
            .controller
            .create_or_update_schedule(&Caller::Operator, &request("beta", 0.0))
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Validation(_)));
        assert_eq!(err.code(), "CONFIG_VALIDATION_ERROR");
        assert!(fx.store.list_all().unwrap().is_empty());
        assert_eq!(fx.rec.calls(), 0);
    }

    #[tokio::test]
    async fn interval_bounds_and_bad_tenant_ids() {
        let fx = fixture();
        for hours in [0.1, -2.0, f64::NAN, f64::INFINITY, 24.0 * 8.0] {
            let err = fx
                .controller
                .create_or_update_schedule(&Caller::Operator, &request("acme", hours))
                .await
                .unwrap_err();
            assert!(matches!(err, ControllerError::Validation(_)), "{hours}");
        }
        for tenant in ["", "acme corp", "acme/../beta"] {
            let err = fx
                .controller
                .create_or_update_schedule(&Caller::Operator, &request(tenant, 2.0))
                .await
                .unwrap_err();
            assert!(matches!(err, ControllerError::Validation(_)), "{tenant:?}");
        }
        assert!(fx.store.list_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_then_update_reconciles_each_time() {
        let fx = fixture();
        let caller = Caller::Tenant("acme".into());

        let created = fx
            .controller
            .create_or_update_schedule(&caller, &request("acme", 2.0))
            .await
            .unwrap();
        assert!(created.previous.is_none());
        assert_eq!(created.schedule.interval_secs, 7200);
        assert_eq!(created.reconciliation.len(), 1);
        assert_eq!(fx.rec.calls(), 1);

        let updated = fx
            .controller
            .create_or_update_schedule(&caller, &request("acme", 0.5))
            .await
            .unwrap();
        assert_eq!(updated.previous.unwrap().interval_secs, 7200);
        assert_eq!(updated.schedule.interval_secs, 1800);
        assert_eq!(fx.rec.calls(), 2);
    }

    #[tokio::test]
    async fn default_trigger_source_comes_from_limits() {
        let fx = fixture();
        let mut req = request("acme", 2.0);
        req.trigger_source = None;
        let change = fx
            .controller
            .create_or_update_schedule(&Caller::Operator, &req)
            .await
            .unwrap();
        assert_eq!(
            change.schedule.active_trigger_source,
            TriggerSource::InProcess
        );
    }

    #[tokio::test]
    async fn failing_mechanism_is_reported_and_others_still_run() {
        let conn = cadence_store::open_in_memory().unwrap();
        let store = Arc::new(ScheduleStore::new(conn.clone()));
        let broken = Recording::new("broken", true);
        let healthy = Recording::new("healthy", false);
        let controller = ScheduleController::new(
            store.clone(),
            Arc::new(RunLedger::new(conn)),
            LimitsConfig::default(),
            LedgerConfig::default(),
        )
        .with_reconciler(broken.clone())
        .with_reconciler(healthy.clone());
        assert_eq!(controller.mechanisms(), vec!["broken", "healthy"]);

        let change = controller
            .create_or_update_schedule(&Caller::Operator, &request("acme", 2.0))
            .await
            .unwrap();
        assert!(change.reconciliation[0].error.is_some());
        assert!(change.reconciliation[1].summary.is_some());
        assert_eq!(healthy.calls(), 1);
        // the write stands
        assert_eq!(store.list_all().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cross_tenant_access_is_rejected() {
        let fx = fixture();
        fx.controller
            .create_or_update_schedule(&Caller::Operator, &request("beta", 2.0))
            .await
            .unwrap();
        let acme = Caller::Tenant("acme".into());

        let err = fx
            .controller
            .create_or_update_schedule(&acme, &request("beta", 4.0))
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Forbidden { .. }));
        assert!(matches!(
            fx.controller.get_status(&acme, "beta"),
            Err(ControllerError::Forbidden { .. })
        ));
        assert!(matches!(
            fx.controller.delete_schedule(&acme, "beta", None).await,
            Err(ControllerError::Forbidden { .. })
        ));
        assert!(matches!(
            fx.controller.list_all(&acme),
            Err(ControllerError::OperatorOnly)
        ));
        // untouched
        let key = ScheduleKey::new("beta", SyncType::Ticket);
        assert_eq!(fx.store.get_schedule(&key).unwrap().unwrap().interval_secs, 7200);
    }

    #[tokio::test]
    async fn delete_disables_and_reconciles() {
        let fx = fixture();
        let caller = Caller::Tenant("acme".into());
        fx.controller
            .create_or_update_schedule(&caller, &request("acme", 2.0))
            .await
            .unwrap();

        let disabled = fx
            .controller
            .delete_schedule(&caller, "acme", None)
            .await
            .unwrap();
        assert_eq!(disabled.len(), 1);
        assert!(!disabled[0].enabled);
        assert_eq!(fx.rec.calls(), 2);
        assert!(fx.store.get_active_schedules().unwrap().is_empty());

        let status = fx.controller.get_status(&caller, "acme").unwrap();
        assert_eq!(status.schedules[0].next_fire_estimate, None);

        assert!(matches!(
            fx.controller.delete_schedule(&Caller::Operator, "nobody", None).await,
            Err(ControllerError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn status_reports_runs_and_next_fire() {
        let fx = fixture();
        let caller = Caller::Tenant("acme".into());
        fx.controller
            .create_or_update_schedule(&caller, &request("acme", 2.0))
            .await
            .unwrap();
        let key = ScheduleKey::new("acme", SyncType::Ticket);

        let run = fx
            .ledger
            .record_run_start(&key, TriggerSource::External, None)
            .unwrap();
        let done = fx
            .ledger
            .record_run_end(
                &run.run_id,
                &RunOutcome::Succeeded {
                    watermark: "w1".into(),
                    item_count: 12,
                },
            )
            .unwrap();
        fx.ledger
            .record_skipped(&key, TriggerSource::External, "held")
            .unwrap();

        let status = fx.controller.get_status(&caller, "acme").unwrap();
        assert_eq!(status.schedules.len(), 1);
        let sched = &status.schedules[0];
        assert_eq!(sched.last_runs.len(), 2);
        assert_eq!(sched.last_runs[0].status, RunStatus::Skipped);
        assert_eq!(sched.last_runs[1].status, RunStatus::Succeeded);
        assert!(sched.trigger.is_none());

        let estimate = sched.next_fire_estimate.unwrap();
        let from_success = done.finished_at.unwrap() + Duration::hours(2);
        let from_skip = sched.last_runs[0].started_at + Duration::hours(2);
        assert_eq!(estimate, from_success.max(from_skip));

        assert!(matches!(
            fx.controller.get_status(&Caller::Operator, "nobody"),
            Err(ControllerError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn list_all_is_keyed_by_tenant() {
        let fx = fixture();
        fx.controller
            .create_or_update_schedule(&Caller::Operator, &request("acme", 2.0))
            .await
            .unwrap();
        fx.controller
            .create_or_update_schedule(&Caller::Operator, &request("beta", 6.0))
            .await
            .unwrap();
        let key = ScheduleKey::new("beta", SyncType::Ticket);
        fx.ledger
            .record_run_start(&key, TriggerSource::External, None)
            .unwrap();

        let view = fx.controller.list_all(&Caller::Operator).unwrap();
        assert_eq!(view.keys().collect::<Vec<_>>(), vec!["acme", "beta"]);
        assert!(view["acme"][0].last_run.is_none());
        assert_eq!(
            view["beta"][0].last_run.as_ref().unwrap().status,
            RunStatus::Running
        );
    }

    #[tokio::test]
    async fn sweep_releases_stale_runs_and_reconciles() {
        let fx = fixture();
        let key = ScheduleKey::new("acme", SyncType::Ticket);
        let stale = fx
            .ledger
            .record_run_start_at(
                &key,
                TriggerSource::External,
                None,
                Utc::now() - Duration::days(1),
            )
            .unwrap();

        let report = fx.controller.reconcile(&Caller::Operator).await.unwrap();
        assert_eq!(report.stale_failed, 1);
        assert_eq!(report.reconciliation.len(), 1);
        assert_eq!(fx.rec.calls(), 1);
        let row = fx.ledger.get_run(&stale.run_id).unwrap().unwrap();
        assert_eq!(row.status, RunStatus::Failed);
        assert!(fx.ledger.running_run(&key).unwrap().is_none());

        assert!(matches!(
            fx.controller.reconcile(&Caller::Tenant("acme".into())).await,
            Err(ControllerError::OperatorOnly)
        ));
    }
}
