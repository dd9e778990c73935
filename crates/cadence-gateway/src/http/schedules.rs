//! `/schedules`: tenant-scoped schedule administration.
//!
//! Every handler authenticates first; tenant scoping itself is enforced by
//! the controller so the rules hold for any other front end too.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    Json,
};
use cadence_controller::{ScheduleChange, ScheduleHealth, ScheduleRequest, SweepReport, TenantStatus};
use cadence_core::SyncType;
use serde::Deserialize;
use tracing::info;

use crate::app::AppState;
use crate::http::auth::authenticate;
use crate::http::error::ApiError;

#[derive(Debug, Default, Deserialize)]
pub struct DeleteParams {
    /// Only this sync type; every sync type of the tenant when absent.
    pub sync_type: Option<SyncType>,
}

/// POST /schedules: create or update one `(tenant_id, sync_type)` config.
pub async fn create_schedule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<ScheduleRequest>, JsonRejection>,
) -> Result<Json<ScheduleChange>, ApiError> {
    let caller = authenticate(&state.config.auth, &headers)?;
    let Json(req) = body?;
    let change = state
        .controller
        .create_or_update_schedule(&caller, &req)
        .await?;
    Ok(Json(change))
}

/// GET /schedules: operator health view over every tenant.
pub async fn list_schedules(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<BTreeMap<String, Vec<ScheduleHealth>>>, ApiError> {
    let caller = authenticate(&state.config.auth, &headers)?;
    Ok(Json(state.controller.list_all(&caller)?))
}

/// GET /schedules/{tenant_id}: configs, recent runs and next fire.
pub async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<TenantStatus>, ApiError> {
    let caller = authenticate(&state.config.auth, &headers)?;
    Ok(Json(state.controller.get_status(&caller, &tenant_id)?))
}

/// DELETE /schedules/{tenant_id}[?sync_type=]: disable and disarm.
pub async fn delete_schedule(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
    headers: HeaderMap,
    params: Result<Query<DeleteParams>, QueryRejection>,
) -> Result<StatusCode, ApiError> {
    let caller = authenticate(&state.config.auth, &headers)?;
    let Query(params) = params?;
    let disabled = state
        .controller
        .delete_schedule(&caller, &tenant_id, params.sync_type)
        .await?;
    info!(tenant_id = %tenant_id, count = disabled.len(), "schedules disabled via API");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /schedules/reconcile: operator-triggered sweep.
pub async fn reconcile(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<SweepReport>, ApiError> {
    let caller = authenticate(&state.config.auth, &headers)?;
    Ok(Json(state.controller.reconcile(&caller).await?))
}
