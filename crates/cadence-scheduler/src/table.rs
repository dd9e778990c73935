//! Pure trigger state machine. No timers, no I/O: every transition takes the
//! current time as an argument so it can be unit-tested directly.

use std::collections::BTreeMap;

use cadence_core::{ScheduleKey, TenantScheduleConfig};
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::schedule::{add_saturating, compute_next_fire, FireAnchors};
use crate::types::{SlotSnapshot, TriggerState};

/// A slot that became due, handed to a fire task.
///
/// `generation` ties the task's later callbacks to the slot incarnation that
/// fired; callbacks for a slot that was since disarmed (or disarmed and
/// re-armed) are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fire {
    pub key: ScheduleKey,
    pub generation: u64,
}

/// What [`TriggerTable::upsert`] did to a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotChange {
    Created,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone)]
struct Slot {
    config: TenantScheduleConfig,
    state: TriggerState,
    next_fire: Option<DateTime<Utc>>,
    last_fire: Option<DateTime<Utc>>,
    run_id: Option<String>,
    generation: u64,
}

impl Slot {
    fn arm(&mut self, anchors: &FireAnchors, now: DateTime<Utc>, spread: Duration) {
        self.next_fire = Some(compute_next_fire(&self.config, anchors, now, spread));
        self.state = TriggerState::Armed;
    }
}

/// Every armed `(tenant_id, sync_type)` of this process and its state.
#[derive(Debug)]
pub struct TriggerTable {
    slots: BTreeMap<ScheduleKey, Slot>,
    catchup_spread: Duration,
    next_generation: u64,
}

impl TriggerTable {
    pub fn new(catchup_spread: Duration) -> Self {
        Self {
            slots: BTreeMap::new(),
            catchup_spread,
            next_generation: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn keys(&self) -> Vec<ScheduleKey> {
        self.slots.keys().cloned().collect()
    }

    /// Register or refresh the slot for an active config.
    ///
    /// A new key is armed from `anchors`. An existing key is re-armed only
    /// when its interval changed and it is waiting on the timer; a slot with
    /// a fire in flight keeps its state and picks up the new interval when
    /// the run finishes.
    pub fn upsert(
        &mut self,
        config: TenantScheduleConfig,
        anchors: &FireAnchors,
        now: DateTime<Utc>,
    ) -> SlotChange {
        let key = config.key();
        let spread = self.catchup_spread;

        if let Some(slot) = self.slots.get_mut(&key) {
            let interval_changed = slot.config.interval_secs != config.interval_secs;
            slot.config = config;
            if !interval_changed {
                return SlotChange::Unchanged;
            }
            if slot.state.is_waiting() || slot.state == TriggerState::Idle {
                slot.arm(anchors, now, spread);
            }
            debug!(%key, next_fire = ?slot.next_fire, "trigger slot updated");
            return SlotChange::Updated;
        }

        let generation = self.next_generation;
        self.next_generation += 1;
        let mut slot = Slot {
            config,
            state: TriggerState::Idle,
            next_fire: None,
            last_fire: None,
            run_id: None,
            generation,
        };
        slot.arm(anchors, now, spread);
        debug!(%key, next_fire = ?slot.next_fire, "trigger slot armed");
        self.slots.insert(key, slot);
        SlotChange::Created
    }

    /// Drop a slot. An in-flight run is left to finish; its callbacks no
    /// longer match any slot and are ignored.
    pub fn remove(&mut self, key: &ScheduleKey) -> Option<TriggerState> {
        self.slots.remove(key).map(|slot| slot.state)
    }

    /// Move every waiting slot whose fire time has come to `firing`.
    pub fn due(&mut self, now: DateTime<Utc>) -> Vec<Fire> {
        let mut fires = Vec::new();
        for (key, slot) in self.slots.iter_mut() {
            if !slot.state.is_waiting() {
                continue;
            }
            if slot.next_fire.is_some_and(|at| at <= now) {
                slot.state = TriggerState::Firing;
                slot.last_fire = Some(now);
                slot.next_fire = None;
                fires.push(Fire {
                    key: key.clone(),
                    generation: slot.generation,
                });
            }
        }
        fires
    }

    /// `firing → executing`: the ledger accepted our running row.
    pub fn on_started(&mut self, fire: &Fire, run_id: &str) {
        if let Some(slot) = self.current(fire, TriggerState::Firing) {
            slot.state = TriggerState::Executing;
            slot.run_id = Some(run_id.to_string());
        }
    }

    /// `firing → skipped`: another run holds the key. Re-armed one interval
    /// after the attempt.
    pub fn on_skipped(&mut self, fire: &Fire, now: DateTime<Utc>) {
        if let Some(slot) = self.current(fire, TriggerState::Firing) {
            slot.state = TriggerState::Skipped;
            slot.next_fire = Some(add_saturating(now, slot.config.interval()));
        }
    }

    /// `executing → idle → armed`: the run was finalized in the ledger.
    pub fn on_finished(&mut self, fire: &Fire, anchors: &FireAnchors, now: DateTime<Utc>) {
        let spread = self.catchup_spread;
        if let Some(slot) = self.current(fire, TriggerState::Executing) {
            slot.run_id = None;
            slot.arm(anchors, now, spread);
        }
    }

    /// The ledger could not be read or written while firing or finishing.
    /// The slot stays registered and is retried at `retry_at`.
    pub fn on_backoff(&mut self, fire: &Fire, retry_at: DateTime<Utc>) {
        if let Some(slot) = self.slots.get_mut(&fire.key) {
            if slot.generation != fire.generation {
                return;
            }
            slot.state = TriggerState::Armed;
            slot.run_id = None;
            slot.next_fire = Some(retry_at);
        }
    }

    /// Earliest fire time of any waiting slot.
    pub fn next_wakeup(&self) -> Option<DateTime<Utc>> {
        self.slots
            .values()
            .filter(|s| s.state.is_waiting())
            .filter_map(|s| s.next_fire)
            .min()
    }

    pub fn get(&self, key: &ScheduleKey) -> Option<SlotSnapshot> {
        self.slots.get(key).map(|slot| snapshot(key, slot))
    }

    pub fn snapshot(&self) -> Vec<SlotSnapshot> {
        self.slots
            .iter()
            .map(|(key, slot)| snapshot(key, slot))
            .collect()
    }

    fn current(&mut self, fire: &Fire, expected: TriggerState) -> Option<&mut Slot> {
        self.slots
            .get_mut(&fire.key)
            .filter(|slot| slot.generation == fire.generation && slot.state == expected)
    }
}

fn snapshot(key: &ScheduleKey, slot: &Slot) -> SlotSnapshot {
    SlotSnapshot {
        tenant_id: key.tenant_id.clone(),
        sync_type: key.sync_type,
        state: slot.state,
        interval_secs: slot.config.interval_secs,
        next_fire: slot.next_fire,
        last_fire: slot.last_fire,
        run_id: slot.run_id.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::{SyncType, TriggerSource};

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn config(tenant: &str, hours: u64, created_at: DateTime<Utc>) -> TenantScheduleConfig {
        TenantScheduleConfig {
            tenant_id: tenant.into(),
            sync_type: SyncType::Ticket,
            interval_secs: hours * 3600,
            enabled: true,
            active_trigger_source: TriggerSource::InProcess,
            created_at,
            updated_at: created_at,
        }
    }

    fn acme() -> ScheduleKey {
        ScheduleKey::new("acme", SyncType::Ticket)
    }

    #[test]
    fn full_cycle_idle_armed_firing_executing_armed() {
        let t0 = at("2026-03-01T08:00:00Z");
        let mut table = TriggerTable::new(Duration::zero());
        let change = table.upsert(config("acme", 2, t0), &FireAnchors::default(), t0);
        assert_eq!(change, SlotChange::Created);

        let slot = table.get(&acme()).unwrap();
        assert_eq!(slot.state, TriggerState::Armed);
        assert_eq!(slot.next_fire, Some(at("2026-03-01T10:00:00Z")));

        assert!(table.due(at("2026-03-01T09:59:59Z")).is_empty());
        let fires = table.due(at("2026-03-01T10:00:00Z"));
        assert_eq!(fires.len(), 1);
        assert_eq!(table.get(&acme()).unwrap().state, TriggerState::Firing);
        // a firing slot is not due twice
        assert!(table.due(at("2026-03-01T10:00:01Z")).is_empty());
        assert_eq!(table.next_wakeup(), None);

        table.on_started(&fires[0], "run-1");
        let slot = table.get(&acme()).unwrap();
        assert_eq!(slot.state, TriggerState::Executing);
        assert_eq!(slot.run_id.as_deref(), Some("run-1"));

        let anchors = FireAnchors {
            last_success_end: Some(at("2026-03-01T10:05:00Z")),
            last_attempt_start: Some(at("2026-03-01T10:00:00Z")),
        };
        table.on_finished(&fires[0], &anchors, at("2026-03-01T10:05:00Z"));
        let slot = table.get(&acme()).unwrap();
        assert_eq!(slot.state, TriggerState::Armed);
        assert_eq!(slot.run_id, None);
        assert_eq!(slot.next_fire, Some(at("2026-03-01T12:05:00Z")));
    }

    #[test]
    fn skipped_slot_rearms_one_interval_later() {
        let t0 = at("2026-03-01T08:00:00Z");
        let mut table = TriggerTable::new(Duration::zero());
        table.upsert(config("acme", 2, t0), &FireAnchors::default(), t0);

        let now = at("2026-03-01T10:01:00Z");
        let fires = table.due(now);
        table.on_skipped(&fires[0], now);
        let slot = table.get(&acme()).unwrap();
        assert_eq!(slot.state, TriggerState::Skipped);
        assert_eq!(slot.next_fire, Some(at("2026-03-01T12:01:00Z")));
        assert_eq!(table.next_wakeup(), slot.next_fire);

        // skipped → firing on the next due
        assert_eq!(table.due(at("2026-03-01T12:01:00Z")).len(), 1);
    }

    #[test]
    fn backoff_keeps_the_slot_registered() {
        let t0 = at("2026-03-01T08:00:00Z");
        let mut table = TriggerTable::new(Duration::zero());
        table.upsert(config("acme", 2, t0), &FireAnchors::default(), t0);
        let fires = table.due(at("2026-03-01T10:00:00Z"));

        table.on_backoff(&fires[0], at("2026-03-01T10:01:00Z"));
        let slot = table.get(&acme()).unwrap();
        assert_eq!(slot.state, TriggerState::Armed);
        assert_eq!(slot.next_fire, Some(at("2026-03-01T10:01:00Z")));
    }

    #[test]
    fn stale_callbacks_after_disarm_are_ignored() {
        let t0 = at("2026-03-01T08:00:00Z");
        let mut table = TriggerTable::new(Duration::zero());
        table.upsert(config("acme", 2, t0), &FireAnchors::default(), t0);
        let fires = table.due(at("2026-03-01T10:00:00Z"));
        table.on_started(&fires[0], "run-1");

        // disabled mid-run, then re-enabled
        assert_eq!(table.remove(&acme()), Some(TriggerState::Executing));
        let now = at("2026-03-01T10:02:00Z");
        table.upsert(config("acme", 2, t0), &FireAnchors::default(), now);

        table.on_finished(&fires[0], &FireAnchors::default(), now);
        table.on_backoff(&fires[0], now);
        let slot = table.get(&acme()).unwrap();
        assert_eq!(slot.state, TriggerState::Armed);
        assert_eq!(slot.run_id, None);
    }

    #[test]
    fn interval_change_rearms_waiting_slots_only() {
        let t0 = at("2026-03-01T08:00:00Z");
        let mut table = TriggerTable::new(Duration::zero());
        table.upsert(config("acme", 2, t0), &FireAnchors::default(), t0);
        assert_eq!(
            table.upsert(config("acme", 2, t0), &FireAnchors::default(), t0),
            SlotChange::Unchanged
        );

        let change = table.upsert(config("acme", 4, t0), &FireAnchors::default(), t0);
        assert_eq!(change, SlotChange::Updated);
        assert_eq!(
            table.get(&acme()).unwrap().next_fire,
            Some(at("2026-03-01T12:00:00Z"))
        );

        let fires = table.due(at("2026-03-01T12:00:00Z"));
        table.on_started(&fires[0], "run-1");
        table.upsert(config("acme", 1, t0), &FireAnchors::default(), t0);
        let slot = table.get(&acme()).unwrap();
        assert_eq!(slot.state, TriggerState::Executing);
        assert_eq!(slot.interval_secs, 3600);
    }

    #[test]
    fn next_wakeup_is_the_earliest_waiting_slot() {
        let t0 = at("2026-03-01T08:00:00Z");
        let mut table = TriggerTable::new(Duration::zero());
        assert_eq!(table.next_wakeup(), None);
        table.upsert(config("acme", 2, t0), &FireAnchors::default(), t0);
        table.upsert(config("beta", 1, t0), &FireAnchors::default(), t0);
        assert_eq!(table.next_wakeup(), Some(at("2026-03-01T09:00:00Z")));
        assert_eq!(table.len(), 2);
    }
}
