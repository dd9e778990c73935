use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::TriggerSource;

/// One schedule that a reconciliation pass could not bring in line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileFailure {
    /// `tenant:sync_type` or the external rule name.
    pub key: String,
    pub reason: String,
}

/// Outcome of one reconciliation pass of a single trigger mechanism.
///
/// `created + updated + removed` counts side effects. Two consecutive passes
/// with no config change in between must report zero on the second.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileSummary {
    pub mechanism: String,
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<ReconcileFailure>,
}

impl ReconcileSummary {
    pub fn new(mechanism: impl Into<String>) -> Self {
        Self {
            mechanism: mechanism.into(),
            ..Self::default()
        }
    }

    pub fn side_effects(&self) -> usize {
        self.created + self.updated + self.removed
    }

    pub fn fail(&mut self, key: impl Into<String>, reason: impl Into<String>) {
        self.failures.push(ReconcileFailure {
            key: key.into(),
            reason: reason.into(),
        });
    }
}

/// Common interface of every trigger mechanism the controller drives.
///
/// Implementations read desired state from the schedule store on every call,
/// so a pass can be repeated at any time and converges without duplicates.
#[async_trait]
pub trait TriggerReconciler: Send + Sync {
    /// Stable lowercase identifier (e.g. `"in_process"`).
    fn name(&self) -> &str;

    /// The trigger source whose schedules this mechanism fires.
    fn source(&self) -> TriggerSource;

    /// Make the mechanism's actual triggers match the schedule store.
    async fn reconcile(&self) -> Result<ReconcileSummary>;
}
