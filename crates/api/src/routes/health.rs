use std::collections::BTreeMap;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(liveness))
        .route("/health/ready", get(readiness))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadinessResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, &'static str>,
}

async fn liveness() -> Json<HealthResponse> {
    Json(HealthResponse { status: "alive" })
}

/// Readiness requires the store and the queue schema; both ride on the same
/// database but fail independently (pgmq may be missing on a fresh db).
async fn readiness(
    State(state): State<AppState>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let mut checks = BTreeMap::new();

    let db_ok = sqlx::query("SELECT 1").execute(&state.db).await.is_ok();
    checks.insert("database", if db_ok { "healthy" } else { "unhealthy" });
    if !db_ok {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                status: "not ready",
                checks,
            }),
        );
    }

    let queue_ok = sqlx::query("SELECT count(*) FROM pgmq.meta")
        .execute(&state.db)
        .await
        .is_ok();
    checks.insert("queue", if queue_ok { "healthy" } else { "unhealthy" });
    if !queue_ok {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                status: "not ready",
                checks,
            }),
        );
    }

    (
        StatusCode::OK,
        Json(ReadinessResponse {
            status: "ready",
            checks,
        }),
    )
}
