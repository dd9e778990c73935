//! `cadence-rules`: the external trigger adapter.
//!
//! Keeps rules in a cloud-managed rule engine congruent with the schedule
//! store. Rules are a re-derivable mirror: each carries only
//! `(tenant_id, sync_type)` as input, and its name is a pure function of the
//! same pair, so [`RuleReconciler`] can be re-run at any time and converges
//! by create-or-update, never by append.

pub mod engine;
pub mod error;
pub mod http;
pub mod memory;
pub mod naming;
pub mod reconciler;
pub mod types;

pub use engine::RuleEngine;
pub use error::{Result, RuleError};
pub use http::HttpRuleEngine;
pub use memory::MemoryRuleEngine;
pub use naming::rule_name;
pub use reconciler::RuleReconciler;
pub use types::{ExternalRule, RuleInput, RuleState};
