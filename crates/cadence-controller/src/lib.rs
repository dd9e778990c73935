//! `cadence-controller`: the administrative surface behind `/schedules`.
//!
//! Writes go to the schedule store first and are then pushed to every
//! registered trigger mechanism through [`cadence_core::TriggerReconciler`].
//! Every operation except [`ScheduleController::list_all`] and the sweep is
//! scoped to one tenant and checked against the [`Caller`].

pub mod caller;
pub mod controller;
pub mod error;
pub mod types;

pub use caller::Caller;
pub use controller::ScheduleController;
pub use error::{ControllerError, Result};
pub use types::{
    MechanismReport, ScheduleChange, ScheduleHealth, ScheduleRequest, ScheduleStatus,
    SweepReport, TenantStatus,
};
