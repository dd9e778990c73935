use cadence_core::{ScheduleKey, SyncType, TenantScheduleConfig, TriggerSource};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tracing::{info, instrument};

use crate::db::{get_enum, get_ts, lock, now, ts, SharedConnection};
use crate::error::Result;

const SELECT_COLUMNS: &str = "SELECT tenant_id, sync_type, interval_secs, enabled,
        active_trigger_source, created_at, updated_at
     FROM schedules";

/// The mutable part of a schedule, as written by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleUpsert {
    pub interval_secs: u64,
    pub enabled: bool,
    pub active_trigger_source: TriggerSource,
}

/// Result of [`ScheduleStore::upsert_schedule`].
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub current: TenantScheduleConfig,
    /// The config before this write, or `None` if the key was new.
    pub previous: Option<TenantScheduleConfig>,
}

/// Persisted registry of per-tenant schedule configuration.
///
/// Rows are never deleted: a removed schedule is a disabled one, so its
/// audit trail and `created_at` anchor survive.
pub struct ScheduleStore {
    conn: SharedConnection,
}

impl ScheduleStore {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    /// Create or update the schedule for `(tenant_id, sync_type)`.
    pub fn upsert_schedule(
        &self,
        tenant_id: &str,
        sync_type: SyncType,
        upsert: &ScheduleUpsert,
    ) -> Result<UpsertOutcome> {
        self.upsert_schedule_at(tenant_id, sync_type, upsert, now())
    }

    /// [`upsert_schedule`](Self::upsert_schedule) with an explicit write time.
    #[instrument(skip(self, upsert), fields(%tenant_id, %sync_type))]
    pub fn upsert_schedule_at(
        &self,
        tenant_id: &str,
        sync_type: SyncType,
        upsert: &ScheduleUpsert,
        at: DateTime<Utc>,
    ) -> Result<UpsertOutcome> {
        let mut db = lock(&self.conn)?;
        let tx = db.transaction()?;

        let previous = tx
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE tenant_id = ?1 AND sync_type = ?2"),
                params![tenant_id, sync_type.as_str()],
                row_to_config,
            )
            .optional()?;

        tx.execute(
            "INSERT INTO schedules
             (tenant_id, sync_type, interval_secs, enabled, active_trigger_source,
              created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT (tenant_id, sync_type) DO UPDATE SET
                interval_secs         = excluded.interval_secs,
                enabled               = excluded.enabled,
                active_trigger_source = excluded.active_trigger_source,
                updated_at            = excluded.updated_at",
            params![
                tenant_id,
                sync_type.as_str(),
                upsert.interval_secs as i64,
                upsert.enabled,
                upsert.active_trigger_source.as_str(),
                ts(at),
            ],
        )?;

        let current = tx.query_row(
            &format!("{SELECT_COLUMNS} WHERE tenant_id = ?1 AND sync_type = ?2"),
            params![tenant_id, sync_type.as_str()],
            row_to_config,
        )?;
        tx.commit()?;

        info!(
            interval_secs = upsert.interval_secs,
            enabled = upsert.enabled,
            source = %upsert.active_trigger_source,
            created = previous.is_none(),
            "schedule upserted"
        );
        Ok(UpsertOutcome { current, previous })
    }

    /// Mark the tenant's schedule(s) disabled. `sync_type = None` disables
    /// every sync type of the tenant. Returns the affected configs as they
    /// are now; an empty vec means the tenant has no such schedule.
    #[instrument(skip(self), fields(%tenant_id))]
    pub fn disable(
        &self,
        tenant_id: &str,
        sync_type: Option<SyncType>,
    ) -> Result<Vec<TenantScheduleConfig>> {
        let at = ts(now());
        let mut db = lock(&self.conn)?;
        let tx = db.transaction()?;
        match sync_type {
            Some(t) => tx.execute(
                "UPDATE schedules SET enabled = 0, updated_at = ?1
                 WHERE tenant_id = ?2 AND sync_type = ?3 AND enabled = 1",
                params![at, tenant_id, t.as_str()],
            )?,
            None => tx.execute(
                "UPDATE schedules SET enabled = 0, updated_at = ?1
                 WHERE tenant_id = ?2 AND enabled = 1",
                params![at, tenant_id],
            )?,
        };
        let affected = {
            let mut stmt = tx.prepare(&format!(
                "{SELECT_COLUMNS} WHERE tenant_id = ?1 AND (?2 IS NULL OR sync_type = ?2)
                 ORDER BY sync_type"
            ))?;
            let rows = stmt.query_map(
                params![tenant_id, sync_type.map(|t| t.as_str())],
                row_to_config,
            )?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        tx.commit()?;
        info!(count = affected.len(), "schedules disabled");
        Ok(affected)
    }

    /// Retrieve one schedule, returning `None` if it was never created.
    pub fn get_schedule(&self, key: &ScheduleKey) -> Result<Option<TenantScheduleConfig>> {
        let db = lock(&self.conn)?;
        let config = db
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE tenant_id = ?1 AND sync_type = ?2"),
                params![key.tenant_id, key.sync_type.as_str()],
                row_to_config,
            )
            .optional()?;
        Ok(config)
    }

    /// Every schedule of one tenant, enabled or not.
    pub fn list_for_tenant(&self, tenant_id: &str) -> Result<Vec<TenantScheduleConfig>> {
        self.query(
            &format!("{SELECT_COLUMNS} WHERE tenant_id = ?1 ORDER BY sync_type"),
            params![tenant_id],
        )
    }

    /// All enabled configs, whichever trigger source owns them.
    ///
    /// Read by both trigger mechanisms at startup and on every reconciliation.
    pub fn get_active_schedules(&self) -> Result<Vec<TenantScheduleConfig>> {
        self.query(
            &format!("{SELECT_COLUMNS} WHERE enabled = 1 ORDER BY tenant_id, sync_type"),
            params![],
        )
    }

    /// Every schedule ever created.
    pub fn list_all(&self) -> Result<Vec<TenantScheduleConfig>> {
        self.query(
            &format!("{SELECT_COLUMNS} ORDER BY tenant_id, sync_type"),
            params![],
        )
    }

    fn query(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<TenantScheduleConfig>> {
        let db = lock(&self.conn)?;
        let mut stmt = db.prepare(sql)?;
        let rows = stmt.query_map(params, row_to_config)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

/// Map a SQLite row to a `TenantScheduleConfig`.
fn row_to_config(row: &Row<'_>) -> rusqlite::Result<TenantScheduleConfig> {
    Ok(TenantScheduleConfig {
        tenant_id: row.get(0)?,
        sync_type: get_enum(row, 1)?,
        interval_secs: row.get::<_, i64>(2)?.max(0) as u64,
        enabled: row.get(3)?,
        active_trigger_source: get_enum(row, 4)?,
        created_at: get_ts(row, 5)?,
        updated_at: get_ts(row, 6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory;
    use chrono::Duration;

    fn hourly(hours: u64) -> ScheduleUpsert {
        ScheduleUpsert {
            interval_secs: hours * 3600,
            enabled: true,
            active_trigger_source: TriggerSource::InProcess,
        }
    }

    #[test]
    fn upsert_returns_previous_and_keeps_created_at() {
        let store = ScheduleStore::new(memory());
        let t0 = now() - Duration::days(1);

        let first = store
            .upsert_schedule_at("acme", SyncType::Ticket, &hourly(2), t0)
            .unwrap();
        assert!(first.previous.is_none());
        assert_eq!(first.current.created_at, t0);

        let second = store
            .upsert_schedule("acme", SyncType::Ticket, &hourly(4))
            .unwrap();
        let previous = second.previous.expect("previous config");
        assert_eq!(previous.interval_secs, 7200);
        assert_eq!(second.current.interval_secs, 4 * 3600);
        assert_eq!(second.current.created_at, t0);
        assert!(second.current.updated_at > t0);

        // one row per (tenant, sync_type)
        assert_eq!(store.list_all().unwrap().len(), 1);
    }

    #[test]
    fn active_schedules_exclude_disabled_rows() {
        let store = ScheduleStore::new(memory());
        store
            .upsert_schedule("acme", SyncType::Ticket, &hourly(2))
            .unwrap();
        store
            .upsert_schedule("acme", SyncType::Article, &hourly(6))
            .unwrap();
        store
            .upsert_schedule("beta", SyncType::Ticket, &hourly(1))
            .unwrap();

        let disabled = store.disable("acme", Some(SyncType::Article)).unwrap();
        assert_eq!(disabled.len(), 1);
        assert!(!disabled[0].enabled);

        let active: Vec<_> = store
            .get_active_schedules()
            .unwrap()
            .into_iter()
            .map(|c| c.key().to_string())
            .collect();
        assert_eq!(active, vec!["acme:ticket", "beta:ticket"]);

        // disabled, not deleted
        assert_eq!(store.list_all().unwrap().len(), 3);
    }

    #[test]
    fn disable_whole_tenant_and_unknown_tenant() {
        let store = ScheduleStore::new(memory());
        store
            .upsert_schedule("acme", SyncType::Ticket, &hourly(2))
            .unwrap();
        store
            .upsert_schedule("acme", SyncType::Agent, &hourly(2))
            .unwrap();

        let disabled = store.disable("acme", None).unwrap();
        assert_eq!(disabled.len(), 2);
        assert!(disabled.iter().all(|c| !c.enabled));
        assert!(store.disable("nobody", None).unwrap().is_empty());
    }

    #[test]
    fn get_schedule_by_key() {
        let store = ScheduleStore::new(memory());
        let key = ScheduleKey::new("acme", SyncType::Ticket);
        assert!(store.get_schedule(&key).unwrap().is_none());
        store
            .upsert_schedule("acme", SyncType::Ticket, &hourly(2))
            .unwrap();
        let cfg = store.get_schedule(&key).unwrap().unwrap();
        assert_eq!(cfg.active_trigger_source, TriggerSource::InProcess);
        assert_eq!(store.list_for_tenant("acme").unwrap().len(), 1);
    }
}
