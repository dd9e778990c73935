use async_trait::async_trait;

use crate::error::Result;
use crate::types::ExternalRule;

/// Client for a rule-based trigger service.
///
/// Implementations must be `Send + Sync` so one client can serve the
/// controller's synchronous reconciles and the periodic sweep.
#[async_trait]
pub trait RuleEngine: Send + Sync {
    /// Stable lowercase identifier for this backend (e.g. `"http"`).
    fn name(&self) -> &str;

    /// Every rule whose name starts with `prefix`, enabled or not.
    async fn list_rules(&self, prefix: &str) -> Result<Vec<ExternalRule>>;

    /// Create the rule, or replace it in place if the name exists.
    async fn put_rule(&self, rule: &ExternalRule) -> Result<()>;

    /// Stop the rule from firing while keeping its definition.
    async fn disable_rule(&self, name: &str) -> Result<()>;

    /// Remove the rule. Deleting an absent rule is not an error.
    async fn delete_rule(&self, name: &str) -> Result<()>;
}
