use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use cadence_core::config::SchedulerConfig;
use cadence_core::{
    CadenceError, ReconcileSummary, ScheduleKey, TenantScheduleConfig, TriggerReconciler,
    TriggerSource,
};
use cadence_executor::{Begin, SyncExecutor};
use cadence_store::{RunLedger, ScheduleStore};
use chrono::{DateTime, Duration, Utc};
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};

use crate::{
    error::{Result, SchedulerError},
    schedule::FireAnchors,
    table::{Fire, SlotChange, TriggerTable},
    types::SlotSnapshot,
};

const MECHANISM: &str = "in_process";

/// State shared between the engine loop, its fire tasks and every handle.
struct Shared {
    table: Mutex<TriggerTable>,
    wake: Notify,
    stopped: AtomicBool,
}

impl Shared {
    // Table methods never leave a slot half-updated, so a poisoned lock
    // still guards a consistent table.
    fn table(&self) -> MutexGuard<'_, TriggerTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cloneable handle for reconciling and inspecting the engine while its loop
/// runs on another task.
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<Shared>,
    store: Arc<ScheduleStore>,
    ledger: Arc<RunLedger>,
}

impl EngineHandle {
    /// Re-read the schedule store and arm, re-arm or disarm slots to match.
    ///
    /// Only enabled configs whose active trigger source is `in_process` get
    /// a slot. A key whose ledger anchors cannot be read is reported in the
    /// summary and left as it was.
    pub fn reconcile_at(&self, now: DateTime<Utc>) -> Result<ReconcileSummary> {
        if self.shared.stopped.load(Ordering::Acquire) {
            return Err(SchedulerError::Stopped);
        }

        let desired: BTreeMap<ScheduleKey, TenantScheduleConfig> = self
            .store
            .get_active_schedules()?
            .into_iter()
            .filter(|c| c.is_active_for(TriggerSource::InProcess))
            .map(|c| (c.key(), c))
            .collect();

        let mut summary = ReconcileSummary::new(MECHANISM);
        let mut resolved = Vec::with_capacity(desired.len());
        for (key, config) in &desired {
            match load_anchors(&self.ledger, key) {
                Ok(anchors) => resolved.push((config.clone(), anchors)),
                Err(e) => {
                    warn!(%key, error = %e, "cannot read ledger anchors; slot left as is");
                    summary.fail(key.to_string(), e.to_string());
                }
            }
        }

        {
            let mut table = self.shared.table();
            for (config, anchors) in resolved {
                match table.upsert(config, &anchors, now) {
                    SlotChange::Created => summary.created += 1,
                    SlotChange::Updated => summary.updated += 1,
                    SlotChange::Unchanged => summary.unchanged += 1,
                }
            }
            for key in table.keys() {
                if desired.contains_key(&key) {
                    continue;
                }
                if let Some(state) = table.remove(&key) {
                    info!(%key, %state, "trigger slot disarmed");
                    summary.removed += 1;
                }
            }
        }
        self.shared.wake.notify_one();

        info!(
            created = summary.created,
            updated = summary.updated,
            removed = summary.removed,
            unchanged = summary.unchanged,
            failures = summary.failures.len(),
            "in-process triggers reconciled"
        );
        Ok(summary)
    }

    /// Every slot, ordered by tenant then sync type.
    pub fn snapshot(&self) -> Vec<SlotSnapshot> {
        self.shared.table().snapshot()
    }

    pub fn state(&self, key: &ScheduleKey) -> Option<SlotSnapshot> {
        self.shared.table().get(key)
    }

    /// `false` once the engine loop has exited.
    pub fn is_running(&self) -> bool {
        !self.shared.stopped.load(Ordering::Acquire)
    }
}

#[async_trait]
impl TriggerReconciler for EngineHandle {
    fn name(&self) -> &str {
        MECHANISM
    }

    fn source(&self) -> TriggerSource {
        TriggerSource::InProcess
    }

    async fn reconcile(&self) -> cadence_core::Result<ReconcileSummary> {
        self.reconcile_at(Utc::now())
            .map_err(|e| CadenceError::Reconciliation {
                mechanism: MECHANISM.to_string(),
                reason: e.to_string(),
            })
    }
}

/// The in-process trigger loop: one shared timer over every armed slot.
pub struct TriggerEngine {
    handle: EngineHandle,
    executor: Arc<SyncExecutor>,
    max_sleep: StdDuration,
    backoff: Duration,
}

impl TriggerEngine {
    pub fn new(
        store: Arc<ScheduleStore>,
        executor: Arc<SyncExecutor>,
        config: &SchedulerConfig,
    ) -> Self {
        let spread = Duration::seconds(config.catchup_spread_secs.min(86_400) as i64);
        let backoff =
            Duration::seconds(config.persistence_backoff_secs.clamp(1, 86_400) as i64);
        let shared = Arc::new(Shared {
            table: Mutex::new(TriggerTable::new(spread)),
            wake: Notify::new(),
            stopped: AtomicBool::new(false),
        });
        Self {
            handle: EngineHandle {
                shared,
                store,
                ledger: executor.ledger().clone(),
            },
            executor,
            max_sleep: StdDuration::from_secs(config.max_sleep_secs.max(1)),
            backoff,
        }
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Main event loop. Rehydrates from the schedule store, then sleeps until
    /// the next slot is due, a handle reconciles, a fire task finishes, or
    /// `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("trigger engine started");
        let mut rehydrated = self.rehydrate();

        loop {
            if !rehydrated {
                rehydrated = self.rehydrate();
            }

            let now = Utc::now();
            let fires = self.handle.shared.table().due(now);
            for fire in fires {
                self.spawn_fire(fire);
            }

            let sleep_for = self.sleep_for(now, rehydrated);
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = self.handle.shared.wake.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.handle.shared.stopped.store(true, Ordering::Release);
        info!("trigger engine shutting down");
    }

    fn rehydrate(&self) -> bool {
        match self.handle.reconcile_at(Utc::now()) {
            Ok(summary) => {
                info!(armed = summary.created, "trigger slots rehydrated");
                true
            }
            Err(e) => {
                error!(error = %e, "rehydrate failed; retrying after backoff");
                false
            }
        }
    }

    fn sleep_for(&self, now: DateTime<Utc>, rehydrated: bool) -> StdDuration {
        let mut sleep = self
            .handle
            .shared
            .table()
            .next_wakeup()
            .and_then(|at| (at - now).to_std().ok())
            .unwrap_or(self.max_sleep)
            .min(self.max_sleep);
        if !rehydrated {
            sleep = sleep.min(self.backoff.to_std().unwrap_or(self.max_sleep));
        }
        sleep
    }

    fn spawn_fire(&self, fire: Fire) {
        let shared = self.handle.shared.clone();
        let executor = self.executor.clone();
        let backoff = self.backoff;
        debug!(key = %fire.key, "trigger slot due");
        tokio::spawn(async move {
            fire_once(&shared, &executor, &fire, backoff).await;
            shared.wake.notify_one();
        });
    }
}

/// One fire of one slot. Never unregisters the slot: every exit path leaves
/// it armed, skipped or backing off.
async fn fire_once(shared: &Shared, executor: &SyncExecutor, fire: &Fire, backoff: Duration) {
    let key = &fire.key;
    let run = match executor.begin(key, TriggerSource::InProcess) {
        Ok(Begin::Started(run)) => run,
        Ok(Begin::Skipped(_)) => {
            shared.table().on_skipped(fire, Utc::now());
            return;
        }
        Err(e) => {
            warn!(%key, error = %e, "cannot start run; backing off");
            shared.table().on_backoff(fire, Utc::now() + backoff);
            return;
        }
    };

    let run_id = run.run_id.clone();
    shared.table().on_started(fire, &run_id);
    info!(%key, %run_id, "in-process trigger fired");

    if let Err(e) = executor.complete(run).await {
        error!(%key, %run_id, error = %e, "run not finalized; backing off");
        shared.table().on_backoff(fire, Utc::now() + backoff);
        return;
    }

    match load_anchors(executor.ledger(), key) {
        Ok(anchors) => shared.table().on_finished(fire, &anchors, Utc::now()),
        Err(e) => {
            warn!(%key, error = %e, "cannot read ledger anchors; backing off");
            shared.table().on_backoff(fire, Utc::now() + backoff);
        }
    }
}

/// Read the ledger facts [`compute_next_fire`](crate::compute_next_fire) anchors on.
pub fn load_anchors(ledger: &RunLedger, key: &ScheduleKey) -> cadence_store::Result<FireAnchors> {
    Ok(FireAnchors {
        last_success_end: ledger.last_successful_run(key)?.and_then(|r| r.finished_at),
        last_attempt_start: ledger.last_run(key)?.map(|r| r.started_at),
    })
}
