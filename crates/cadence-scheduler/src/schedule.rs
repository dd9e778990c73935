use cadence_core::{ScheduleKey, TenantScheduleConfig};
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};

/// Ledger facts that anchor a schedule's next fire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FireAnchors {
    /// `finished_at` of the newest `succeeded` run.
    pub last_success_end: Option<DateTime<Utc>>,
    /// `started_at` of the newest run of any status.
    pub last_attempt_start: Option<DateTime<Utc>>,
}

/// Compute the next UTC fire time for `config`.
///
/// The base is `max(last_success_end, created_at) + interval`, pushed to at
/// least `last_attempt_start + interval` so a failed or skipped attempt does
/// not retry immediately. A result at or before `now` means the schedule is
/// overdue: it fires once, `catchup_offset` after `now`, never once per
/// missed interval.
pub fn compute_next_fire(
    config: &TenantScheduleConfig,
    anchors: &FireAnchors,
    now: DateTime<Utc>,
    catchup_spread: Duration,
) -> DateTime<Utc> {
    let interval = config.interval();
    let base = anchors
        .last_success_end
        .map_or(config.created_at, |end| end.max(config.created_at));

    let mut next = add_saturating(base, interval);
    if let Some(attempt) = anchors.last_attempt_start {
        next = next.max(add_saturating(attempt, interval));
    }

    if next > now {
        next
    } else {
        add_saturating(now, catchup_offset(&config.key(), catchup_spread))
    }
}

/// Deterministic delay in `[0, spread)` for an overdue key.
///
/// Stable across restarts, so a crash loop does not reshuffle tenants.
pub fn catchup_offset(key: &ScheduleKey, spread: Duration) -> Duration {
    let spread_secs = spread.num_seconds();
    if spread_secs <= 0 {
        return Duration::zero();
    }
    let digest = Sha256::digest(key.to_string().as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    let offset = u64::from_be_bytes(head) % spread_secs as u64;
    Duration::seconds(offset as i64)
}

pub(crate) fn add_saturating(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    at.checked_add_signed(by).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::{SyncType, TriggerSource};

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn acme_every_2h(created_at: DateTime<Utc>) -> TenantScheduleConfig {
        TenantScheduleConfig {
            tenant_id: "acme".into(),
            sync_type: SyncType::Ticket,
            interval_secs: 7200,
            enabled: true,
            active_trigger_source: TriggerSource::InProcess,
            created_at,
            updated_at: created_at,
        }
    }

    #[test]
    fn first_fire_is_one_interval_after_creation() {
        let t0 = at("2026-03-01T08:00:00Z");
        let cfg = acme_every_2h(t0);
        let next = compute_next_fire(&cfg, &FireAnchors::default(), t0, Duration::minutes(5));
        assert_eq!(next, at("2026-03-01T10:00:00Z"));
    }

    #[test]
    fn anchored_on_last_success_end_not_creation() {
        let t0 = at("2026-03-01T08:00:00Z");
        let cfg = acme_every_2h(t0);
        let anchors = FireAnchors {
            last_success_end: Some(at("2026-03-01T08:05:00Z")),
            last_attempt_start: Some(at("2026-03-01T08:01:00Z")),
        };
        let next = compute_next_fire(&cfg, &anchors, at("2026-03-01T09:00:00Z"), Duration::zero());
        assert_eq!(next, at("2026-03-01T10:05:00Z"));
    }

    #[test]
    fn failed_attempt_defers_by_an_interval() {
        let t0 = at("2026-03-01T08:00:00Z");
        let cfg = acme_every_2h(t0);
        let anchors = FireAnchors {
            last_success_end: None,
            last_attempt_start: Some(at("2026-03-01T10:00:00Z")),
        };
        let next = compute_next_fire(&cfg, &anchors, at("2026-03-01T10:01:00Z"), Duration::zero());
        assert_eq!(next, at("2026-03-01T12:00:00Z"));
    }

    #[test]
    fn overdue_schedule_fires_once_within_the_spread() {
        let t0 = at("2026-03-01T08:00:00Z");
        let cfg = acme_every_2h(t0);
        let anchors = FireAnchors {
            last_success_end: Some(at("2026-03-01T08:05:00Z")),
            last_attempt_start: Some(at("2026-03-01T08:00:00Z")),
        };
        // process was down for a day
        let now = at("2026-03-02T09:00:00Z");
        let spread = Duration::minutes(5);
        let next = compute_next_fire(&cfg, &anchors, now, spread);
        assert!(next >= now);
        assert!(next < now + spread);
        assert_eq!(next, now + catchup_offset(&cfg.key(), spread));
    }

    #[test]
    fn catchup_offset_is_stable_and_bounded() {
        let spread = Duration::seconds(300);
        let a = ScheduleKey::new("acme", SyncType::Ticket);
        assert_eq!(catchup_offset(&a, spread), catchup_offset(&a, spread));
        for tenant in ["acme", "beta", "gamma", "delta"] {
            let off = catchup_offset(&ScheduleKey::new(tenant, SyncType::Article), spread);
            assert!(off >= Duration::zero() && off < spread);
        }
        assert_eq!(catchup_offset(&a, Duration::zero()), Duration::zero());
    }
}
