use std::collections::BTreeMap;
use std::str::FromStr;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use courier_core::queue::{DeliveryMessage, Topic};
use courier_core::types::{
    Channel, Notification, NotificationBatch, NotificationFilter, Priority, Status,
};
use courier_core::Error;
use courier_db::queries::{idempotency, notifications, templates};
use courier_db::queue;

use crate::{
    error::{ApiError, ApiResult},
    routes::batches::BatchResponse,
    state::{AppState, RequestId},
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/v1/notifications",
            post(create).get(list),
        )
        .route("/api/v1/notifications/batch", post(create_batch))
        .route("/api/v1/notifications/{id}", get(get_by_id))
        .route("/api/v1/notifications/{id}/cancel", patch(cancel))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateNotificationRequest {
    channel: String,
    recipient: String,
    #[serde(default)]
    content: String,
    priority: String,
    scheduled_at: Option<DateTime<Utc>>,
    idempotency_key: Option<String>,
    template_id: Option<Uuid>,
    #[serde(default)]
    template_variables: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct CreateBatchRequest {
    notifications: Vec<CreateNotificationRequest>,
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
    channel: Option<String>,
    batch_id: Option<Uuid>,
    date_from: Option<DateTime<Utc>>,
    date_to: Option<DateTime<Utc>>,
    cursor: Option<Uuid>,
    #[serde(default)]
    page_size: i64,
}

#[derive(Debug, Serialize)]
pub(crate) struct NotificationResponse {
    id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    batch_id: Option<Uuid>,
    channel: String,
    recipient: String,
    content: String,
    priority: String,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    scheduled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sent_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    retry_count: i32,
    max_retries: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider_message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    template_id: Option<Uuid>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    template_variables: BTreeMap<String, String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<&Notification> for NotificationResponse {
    fn from(n: &Notification) -> Self {
        Self {
            id: n.id,
            batch_id: n.batch_id,
            channel: n.channel.to_string(),
            recipient: n.recipient.clone(),
            content: n.content.clone(),
            priority: n.priority.to_string(),
            status: n.status.to_string(),
            scheduled_at: n.scheduled_at,
            sent_at: n.sent_at,
            failed_at: n.failed_at,
            error_message: n.error_message.clone(),
            retry_count: n.retry_count,
            max_retries: n.max_retries,
            provider_message_id: n.provider_message_id.clone(),
            template_id: n.template_id,
            template_variables: n.template_variables.clone(),
            created_at: n.created_at,
            updated_at: n.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct ListResponse {
    data: Vec<NotificationResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_cursor: Option<Uuid>,
}

#[derive(Debug, Serialize)]
struct CreateBatchResponse {
    batch: BatchResponse,
    notifications: Vec<NotificationResponse>,
}

struct CreateInput {
    channel: Channel,
    recipient: String,
    content: String,
    priority: Priority,
    scheduled_at: Option<DateTime<Utc>>,
    idempotency_key: Option<String>,
    template_id: Option<Uuid>,
    template_variables: BTreeMap<String, String>,
}

impl CreateNotificationRequest {
    fn into_input(self) -> ApiResult<CreateInput> {
        let channel = Channel::from_str(&self.channel)?;
        let priority = Priority::from_str(&self.priority)?;
        Ok(CreateInput {
            channel,
            recipient: self.recipient,
            content: self.content,
            priority,
            scheduled_at: self.scheduled_at,
            idempotency_key: self.idempotency_key,
            template_id: self.template_id,
            template_variables: self.template_variables,
        })
    }
}

async fn create(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(req): Json<CreateNotificationRequest>,
) -> ApiResult<(StatusCode, Json<NotificationResponse>)> {
    let input = req.into_input()?;
    let n = create_one(&state, input, &request_id).await?;
    Ok((StatusCode::CREATED, Json(NotificationResponse::from(&n))))
}

async fn create_one(
    state: &AppState,
    input: CreateInput,
    request_id: &RequestId,
) -> ApiResult<Notification> {
    // An existing binding means a previous create already did the work;
    // return it without touching the store or the log again.
    if let Some(key) = input.idempotency_key.as_deref() {
        if let Some(existing) = idempotency::find_live(&state.db, key).await? {
            return Ok(notifications::get_by_id(&state.db, existing).await?);
        }
    }

    let n = build_notification(state, &input).await?;

    match notifications::create(&state.db, &n).await {
        Ok(()) => {}
        Err(Error::DuplicateIdempotencyKey) => {
            // Lost the insert race; the winner's row is the response.
            let key = input.idempotency_key.as_deref().unwrap_or_default();
            if let Some(winner) = idempotency::find_live(&state.db, key).await? {
                return Ok(notifications::get_by_id(&state.db, winner).await?);
            }
            return Err(Error::DuplicateIdempotencyKey.into());
        }
        Err(err) => return Err(err.into()),
    }

    publish(state, &n, request_id).await?;

    info!(
        id = %n.id,
        channel = %n.channel,
        priority = %n.priority,
        request_id = %request_id.0,
        "notification created"
    );

    Ok(n)
}

async fn build_notification(state: &AppState, input: &CreateInput) -> ApiResult<Notification> {
    let content = match input.template_id {
        Some(template_id) => {
            let template = templates::get_by_id(&state.db, template_id).await?;
            template.render(&input.template_variables)?
        }
        None => input.content.clone(),
    };

    let mut n = Notification::new(
        input.channel,
        &input.recipient,
        &content,
        input.priority,
        input.scheduled_at,
    )?;
    n.idempotency_key = input.idempotency_key.clone();
    n.template_id = input.template_id;
    n.template_variables = input.template_variables.clone();
    Ok(n)
}

/// Scheduled rows are not published at intake; the scheduler promotes them
/// when due.
async fn publish(state: &AppState, n: &Notification, request_id: &RequestId) -> ApiResult<()> {
    if n.status != Status::Pending {
        return Ok(());
    }

    let message = DeliveryMessage::for_notification(n).with_correlation_id(&request_id.0);
    queue::publish(&state.db, Topic::for_priority(n.priority), &message).await?;
    Ok(())
}

async fn create_batch(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(req): Json<CreateBatchRequest>,
) -> ApiResult<(StatusCode, Json<CreateBatchResponse>)> {
    if req.notifications.is_empty() {
        return Err(Error::BatchEmpty.into());
    }
    if req.notifications.len() > 1000 {
        return Err(Error::BatchTooLarge.into());
    }

    let batch = NotificationBatch::new(req.notifications.len() as i32);

    let mut children = Vec::with_capacity(req.notifications.len());
    for item in req.notifications {
        let input = item.into_input()?;
        let mut n = build_notification(&state, &input).await?;
        n.batch_id = Some(batch.id);
        children.push(n);
    }

    notifications::create_batch(&state.db, &batch, &children).await?;

    // Publish per child after the commit; a failed publish leaves the row in
    // the store and is logged rather than failing the whole batch.
    for n in &children {
        if let Err(err) = publish(&state, n, &request_id).await {
            warn!(id = %n.id, error = ?err, "batch child publish failed");
        }
    }

    info!(
        batch_id = %batch.id,
        count = batch.total_count,
        request_id = %request_id.0,
        "batch created"
    );

    Ok((
        StatusCode::CREATED,
        Json(CreateBatchResponse {
            batch: BatchResponse::from(&batch),
            notifications: children.iter().map(NotificationResponse::from).collect(),
        }),
    ))
}

async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<NotificationResponse>> {
    let id = parse_id(&id)?;
    let n = notifications::get_by_id(&state.db, id).await?;
    Ok(Json(NotificationResponse::from(&n)))
}

async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ListResponse>> {
    let filter = NotificationFilter {
        status: query.status.as_deref().map(Status::from_str).transpose()?,
        channel: query.channel.as_deref().map(Channel::from_str).transpose()?,
        batch_id: query.batch_id,
        date_from: query.date_from,
        date_to: query.date_to,
        cursor: query.cursor,
        page_size: query.page_size,
    };

    let page_size = filter.effective_page_size();
    let rows = notifications::list(&state.db, &filter).await?;

    // A full page means there may be more; the last id is the next cursor.
    let next_cursor = if rows.len() as i64 == page_size {
        rows.last().map(|n| n.id)
    } else {
        None
    };

    Ok(Json(ListResponse {
        data: rows.iter().map(NotificationResponse::from).collect(),
        next_cursor,
    }))
}

async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<NotificationResponse>> {
    let id = parse_id(&id)?;

    notifications::cancel(&state.db, id).await?;

    let n = notifications::get_by_id(&state.db, id).await?;
    info!(id = %n.id, "notification cancelled");
    Ok(Json(NotificationResponse::from(&n)))
}

fn parse_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest("invalid notification id".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_parses_minimal_body() {
        let req: CreateNotificationRequest = serde_json::from_str(
            r#"{"channel":"sms","recipient":"+905530050594","content":"Hello","priority":"normal"}"#,
        )
        .unwrap();

        let input = req.into_input().unwrap();
        assert_eq!(input.channel, Channel::Sms);
        assert_eq!(input.priority, Priority::Normal);
        assert!(input.scheduled_at.is_none());
        assert!(input.idempotency_key.is_none());
    }

    #[test]
    fn request_rejects_unknown_channel_and_priority() {
        let req: CreateNotificationRequest = serde_json::from_str(
            r#"{"channel":"fax","recipient":"x","content":"y","priority":"normal"}"#,
        )
        .unwrap();
        assert!(req.into_input().is_err());

        let req: CreateNotificationRequest = serde_json::from_str(
            r#"{"channel":"sms","recipient":"x","content":"y","priority":"urgent"}"#,
        )
        .unwrap();
        assert!(req.into_input().is_err());
    }

    #[test]
    fn response_omits_unset_fields() {
        let n = Notification::new(Channel::Sms, "+905530050594", "Hello", Priority::Normal, None)
            .unwrap();
        let json = serde_json::to_value(NotificationResponse::from(&n)).unwrap();

        assert_eq!(json["status"], "pending");
        assert_eq!(json["retry_count"], 0);
        assert_eq!(json["max_retries"], 3);
        assert!(json.get("batch_id").is_none());
        assert!(json.get("sent_at").is_none());
        assert!(json.get("error_message").is_none());
        assert!(json.get("template_variables").is_none());
    }

    #[test]
    fn response_includes_terminal_fields() {
        let mut n =
            Notification::new(Channel::Sms, "+905530050594", "Hello", Priority::Normal, None)
                .unwrap();
        n.mark_processing();
        n.mark_delivered("abc");

        let json = serde_json::to_value(NotificationResponse::from(&n)).unwrap();
        assert_eq!(json["status"], "delivered");
        assert_eq!(json["provider_message_id"], "abc");
        assert!(json.get("sent_at").is_some());
    }

    #[test]
    fn invalid_id_is_bad_request() {
        assert!(parse_id("not-a-uuid").is_err());
        assert!(parse_id(&Uuid::now_v7().to_string()).is_ok());
    }
}
