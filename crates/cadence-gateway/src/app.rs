use axum::{
    routing::{get, post},
    Router,
};
use cadence_controller::ScheduleController;
use cadence_core::config::CadenceConfig;
use std::sync::Arc;

use crate::http::{health, schedules};

/// Central shared state, passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: CadenceConfig,
    /// Shared with the sweeper task.
    pub controller: Arc<ScheduleController>,
}

impl AppState {
    pub fn new(config: CadenceConfig, controller: ScheduleController) -> Self {
        Self {
            config,
            controller: Arc::new(controller),
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route(
            "/schedules",
            get(schedules::list_schedules).post(schedules::create_schedule),
        )
        .route("/schedules/reconcile", post(schedules::reconcile))
        .route(
            "/schedules/{tenant_id}",
            get(schedules::get_status).delete(schedules::delete_schedule),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
