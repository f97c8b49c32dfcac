use std::str::FromStr;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use courier_core::template::Template;
use courier_core::types::Channel;
use courier_db::queries::templates;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/templates", post(create).get(list))
        .route("/api/v1/templates/{id}", get(get_by_id))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct CreateTemplateRequest {
    name: String,
    channel: String,
    body: String,
}

#[derive(Debug, Serialize)]
struct TemplateResponse {
    id: Uuid,
    name: String,
    channel: String,
    body: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<&Template> for TemplateResponse {
    fn from(t: &Template) -> Self {
        Self {
            id: t.id,
            name: t.name.clone(),
            channel: t.channel.to_string(),
            body: t.body.clone(),
            created_at: t.created_at,
            updated_at: t.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct TemplateListResponse {
    data: Vec<TemplateResponse>,
}

async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateTemplateRequest>,
) -> ApiResult<(StatusCode, Json<TemplateResponse>)> {
    let channel = Channel::from_str(&req.channel)?;
    let template = Template::new(&req.name, channel, &req.body)?;

    templates::create(&state.db, &template).await?;

    info!(id = %template.id, name = %template.name, "template created");
    Ok((StatusCode::CREATED, Json(TemplateResponse::from(&template))))
}

async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<TemplateResponse>> {
    let id =
        Uuid::parse_str(&id).map_err(|_| ApiError::BadRequest("invalid template id".to_string()))?;
    let template = templates::get_by_id(&state.db, id).await?;
    Ok(Json(TemplateResponse::from(&template)))
}

async fn list(State(state): State<AppState>) -> ApiResult<Json<TemplateListResponse>> {
    let data = templates::list(&state.db)
        .await?
        .iter()
        .map(TemplateResponse::from)
        .collect();
    Ok(Json(TemplateListResponse { data }))
}
