use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::engine::RuleEngine;
use crate::error::{Result, RuleError};
use crate::types::{ExternalRule, RuleState};

/// In-process rule engine for local runs and tests.
///
/// Counts every mutating call so callers can assert that a reconcile pass
/// had no side effects.
#[derive(Default)]
pub struct MemoryRuleEngine {
    rules: DashMap<String, ExternalRule>,
    mutations: AtomicUsize,
}

impl MemoryRuleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<ExternalRule> {
        self.rules.get(name).map(|r| r.value().clone())
    }

    /// All rules, sorted by name.
    pub fn rules(&self) -> Vec<ExternalRule> {
        let mut rules: Vec<ExternalRule> = self.rules.iter().map(|r| r.value().clone()).collect();
        rules.sort_by(|a, b| a.name.cmp(&b.name));
        rules
    }

    /// Number of put/disable/delete calls served so far.
    pub fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RuleEngine for MemoryRuleEngine {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list_rules(&self, prefix: &str) -> Result<Vec<ExternalRule>> {
        Ok(self
            .rules()
            .into_iter()
            .filter(|r| r.name.starts_with(prefix))
            .collect())
    }

    async fn put_rule(&self, rule: &ExternalRule) -> Result<()> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        debug!(rule = %rule.name, state = %rule.state, "memory rule put");
        self.rules.insert(rule.name.clone(), rule.clone());
        Ok(())
    }

    async fn disable_rule(&self, name: &str) -> Result<()> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        let mut rule = self.rules.get_mut(name).ok_or_else(|| RuleError::NotFound {
            name: name.to_string(),
        })?;
        rule.state = RuleState::Disabled;
        Ok(())
    }

    async fn delete_rule(&self, name: &str) -> Result<()> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        self.rules.remove(name);
        Ok(())
    }
}
