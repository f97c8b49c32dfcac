use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use courier_core::types::{
    Channel, ChannelStats, Notification, NotificationBatch, Priority, Status,
};
use courier_core::{template::Template, Error};

#[derive(Debug, Clone, FromRow)]
pub struct NotificationRow {
    pub id: Uuid,
    pub batch_id: Option<Uuid>,
    pub idempotency_key: Option<String>,
    pub channel: String,
    pub recipient: String,
    pub content: String,
    pub priority: String,
    pub status: String,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub provider_message_id: Option<String>,
    pub template_id: Option<Uuid>,
    pub template_variables: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = Error;

    fn try_from(row: NotificationRow) -> Result<Self, Error> {
        let template_variables: BTreeMap<String, String> = match row.template_variables {
            Some(value) => serde_json::from_value(value)?,
            None => BTreeMap::new(),
        };

        Ok(Notification {
            id: row.id,
            batch_id: row.batch_id,
            idempotency_key: row.idempotency_key,
            channel: Channel::from_str(&row.channel)?,
            recipient: row.recipient,
            content: row.content,
            priority: Priority::from_str(&row.priority)?,
            status: Status::from_str(&row.status)?,
            scheduled_at: row.scheduled_at,
            sent_at: row.sent_at,
            failed_at: row.failed_at,
            error_message: row.error_message,
            retry_count: row.retry_count,
            max_retries: row.max_retries,
            provider_message_id: row.provider_message_id,
            template_id: row.template_id,
            template_variables,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct BatchRow {
    pub id: Uuid,
    pub total_count: i32,
    pub pending_count: i32,
    pub delivered_count: i32,
    pub failed_count: i32,
    pub cancelled_count: i32,
    pub created_at: DateTime<Utc>,
}

impl From<BatchRow> for NotificationBatch {
    fn from(row: BatchRow) -> Self {
        NotificationBatch {
            id: row.id,
            total_count: row.total_count,
            pending_count: row.pending_count,
            delivered_count: row.delivered_count,
            failed_count: row.failed_count,
            cancelled_count: row.cancelled_count,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct TemplateRow {
    pub id: Uuid,
    pub name: String,
    pub channel: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<TemplateRow> for Template {
    type Error = Error;

    fn try_from(row: TemplateRow) -> Result<Self, Error> {
        Ok(Template {
            id: row.id,
            name: row.name,
            channel: Channel::from_str(&row.channel)?,
            body: row.body,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ChannelStatsRow {
    pub channel: String,
    pub sent: i64,
    pub failed: i64,
    pub avg_latency_ms: f64,
}

impl From<ChannelStatsRow> for ChannelStats {
    fn from(row: ChannelStatsRow) -> Self {
        ChannelStats {
            channel: row.channel,
            sent: row.sent,
            failed: row.failed,
            avg_latency_ms: row.avg_latency_ms,
        }
    }
}
