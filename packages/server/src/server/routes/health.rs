use axum::Json;
use chrono::Utc;
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    ok: bool,
    time: chrono::DateTime<Utc>,
}

/// Unconditional liveness check: always `{ok: true, time: <now>}`.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        time: Utc::now(),
    })
}
