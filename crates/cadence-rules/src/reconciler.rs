use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use cadence_core::config::{RuleRemoval, RulesConfig};
use cadence_core::{
    CadenceError, ReconcileSummary, TenantScheduleConfig, TriggerReconciler, TriggerSource,
};
use cadence_store::ScheduleStore;
use tracing::{info, instrument, warn};

use crate::engine::RuleEngine;
use crate::error::Result;
use crate::naming::{rule_name, rule_prefix};
use crate::types::{ExternalRule, RuleInput, RuleState};

const MECHANISM: &str = "external";

/// Diffs the schedule store against the rule engine and applies the
/// difference.
///
/// Desired state is every enabled config whose active trigger source is
/// `external`. Any other rule under our prefix is disabled or deleted
/// according to the removal policy.
pub struct RuleReconciler {
    store: Arc<ScheduleStore>,
    engine: Arc<dyn RuleEngine>,
    prefix: String,
    target: String,
    removal: RuleRemoval,
}

impl RuleReconciler {
    pub fn new(
        store: Arc<ScheduleStore>,
        engine: Arc<dyn RuleEngine>,
        prefix: impl Into<String>,
        target: impl Into<String>,
        removal: RuleRemoval,
    ) -> Self {
        Self {
            store,
            engine,
            prefix: prefix.into(),
            target: target.into(),
            removal,
        }
    }

    pub fn from_config(
        store: Arc<ScheduleStore>,
        engine: Arc<dyn RuleEngine>,
        config: &RulesConfig,
    ) -> Self {
        Self::new(
            store,
            engine,
            config.prefix.clone(),
            config.target.clone(),
            config.on_disable,
        )
    }

    pub fn engine(&self) -> &Arc<dyn RuleEngine> {
        &self.engine
    }

    /// The rule that should exist for `config`.
    pub fn desired_rule(&self, config: &TenantScheduleConfig) -> ExternalRule {
        let key = config.key();
        ExternalRule {
            name: rule_name(&self.prefix, &key),
            interval_secs: config.interval_secs,
            target: self.target.clone(),
            state: RuleState::Enabled,
            input: RuleInput::from(&key),
        }
    }

    /// A listed rule is ours only if its name is exactly what this prefix
    /// derives for its input; `cadence-` also lists `cadence-staging-*`.
    fn owns(&self, rule: &ExternalRule) -> bool {
        rule.name == rule_name(&self.prefix, &rule.input.key())
    }

    /// One full pass. Fails as a whole only when desired or actual state
    /// cannot be read; a failing rule is recorded in the summary and the pass
    /// moves on.
    #[instrument(skip(self), fields(engine = self.engine.name()))]
    pub async fn reconcile_rules(&self) -> Result<ReconcileSummary> {
        let desired: BTreeMap<String, ExternalRule> = self
            .store
            .get_active_schedules()?
            .iter()
            .filter(|c| c.is_active_for(TriggerSource::External))
            .map(|c| {
                let rule = self.desired_rule(c);
                (rule.name.clone(), rule)
            })
            .collect();

        let actual: BTreeMap<String, ExternalRule> = self
            .engine
            .list_rules(&rule_prefix(&self.prefix))
            .await?
            .into_iter()
            .filter(|r| self.owns(r))
            .map(|r| (r.name.clone(), r))
            .collect();

        let mut summary = ReconcileSummary::new(MECHANISM);

        for (name, want) in &desired {
            let existing = actual.get(name);
            if existing == Some(want) {
                summary.unchanged += 1;
                continue;
            }
            match self.engine.put_rule(want).await {
                Ok(()) if existing.is_some() => {
                    info!(rule = %name, interval_secs = want.interval_secs, "rule updated");
                    summary.updated += 1;
                }
                Ok(()) => {
                    info!(rule = %name, interval_secs = want.interval_secs, "rule created");
                    summary.created += 1;
                }
                Err(e) => {
                    warn!(rule = %name, error = %e, "rule put failed; retried on next sweep");
                    summary.fail(name.clone(), e.to_string());
                }
            }
        }

        for (name, have) in &actual {
            if desired.contains_key(name) {
                continue;
            }
            let result = match self.removal {
                RuleRemoval::Disable if have.state == RuleState::Disabled => {
                    summary.unchanged += 1;
                    continue;
                }
                RuleRemoval::Disable => self.engine.disable_rule(name).await,
                RuleRemoval::Delete => self.engine.delete_rule(name).await,
            };
            match result {
                Ok(()) => {
                    info!(rule = %name, policy = ?self.removal, "rule removed");
                    summary.removed += 1;
                }
                Err(e) => {
                    warn!(rule = %name, error = %e, "rule removal failed; retried on next sweep");
                    summary.fail(name.clone(), e.to_string());
                }
            }
        }

        info!(
            created = summary.created,
            updated = summary.updated,
            removed = summary.removed,
            unchanged = summary.unchanged,
            failures = summary.failures.len(),
            "external rules reconciled"
        );
        Ok(summary)
    }
}

#[async_trait]
impl TriggerReconciler for RuleReconciler {
    fn name(&self) -> &str {
        MECHANISM
    }

    fn source(&self) -> TriggerSource {
        TriggerSource::External
    }

    async fn reconcile(&self) -> cadence_core::Result<ReconcileSummary> {
        self.reconcile_rules()
            .await
            .map_err(|e| CadenceError::Reconciliation {
                mechanism: MECHANISM.to_string(),
                reason: e.to_string(),
            })
    }
}
