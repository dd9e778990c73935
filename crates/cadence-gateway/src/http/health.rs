use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health: liveness probe plus the state of both trigger mechanisms.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let scheduler = match state.controller.engine() {
        Some(engine) => json!({
            "enabled": true,
            "running": engine.is_running(),
            "slots": engine.snapshot().len(),
        }),
        None => json!({ "enabled": false }),
    };
    let rules = &state.config.rules;

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "commit": env!("CADENCE_GIT_SHA"),
        "scheduler": scheduler,
        "rules": {
            "enabled": rules.enabled,
            "backend": rules.backend,
            "prefix": rules.prefix,
        },
        "mechanisms": state.controller.mechanisms(),
    }))
}
