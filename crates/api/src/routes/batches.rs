use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use courier_core::types::NotificationBatch;
use courier_db::queries::batches;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/batches/{id}", get(get_by_id))
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub(crate) struct BatchResponse {
    id: Uuid,
    total_count: i32,
    pending_count: i32,
    delivered_count: i32,
    failed_count: i32,
    cancelled_count: i32,
    created_at: DateTime<Utc>,
}

impl From<&NotificationBatch> for BatchResponse {
    fn from(b: &NotificationBatch) -> Self {
        Self {
            id: b.id,
            total_count: b.total_count,
            pending_count: b.pending_count,
            delivered_count: b.delivered_count,
            failed_count: b.failed_count,
            cancelled_count: b.cancelled_count,
            created_at: b.created_at,
        }
    }
}

async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<BatchResponse>> {
    let id = Uuid::parse_str(&id)
        .map_err(|_| ApiError::BadRequest("invalid batch id".to_string()))?;
    let batch = batches::get_by_id(&state.db, id).await?;
    Ok(Json(BatchResponse::from(&batch)))
}
