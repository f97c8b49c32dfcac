use std::time::Duration;

use sqlx::types::Json;
use sqlx::PgPool;

use courier_core::queue::{DeliveryMessage, Topic};
use courier_core::Result;

/// A message leased from a topic. The payload stays raw JSON so the
/// consumer owns the poison-pill decision.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub msg_id: i64,
    pub read_count: i32,
    pub payload: serde_json::Value,
}

/// Create the backing queue for every topic (idempotent).
pub async fn ensure_topics(pool: &PgPool) -> Result<()> {
    for topic in Topic::ALL {
        sqlx::query("SELECT pgmq.create($1)")
            .bind(topic.queue_name())
            .execute(pool)
            .await?;
    }
    Ok(())
}

/// Publish a delivery pointer to its topic. Returns the message id.
pub async fn publish(pool: &PgPool, topic: Topic, message: &DeliveryMessage) -> Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT pgmq.send($1, $2, 0)")
        .bind(topic.queue_name())
        .bind(Json(message))
        .fetch_one(pool)
        .await?;

    Ok(row.0)
}

/// Re-publish the original payload to its topic after `delay` (in-log retry).
pub async fn publish_raw_delayed(
    pool: &PgPool,
    topic: Topic,
    payload: &serde_json::Value,
    delay: Duration,
) -> Result<i64> {
    let delay_secs = delay.as_secs_f64().round() as i32;

    let row: (i64,) = sqlx::query_as("SELECT pgmq.send($1, $2, $3)")
        .bind(topic.queue_name())
        .bind(payload)
        .bind(delay_secs)
        .fetch_one(pool)
        .await?;

    Ok(row.0)
}

/// Lease the next message, invisible to other consumers for `vt_seconds`.
pub async fn read(pool: &PgPool, topic: Topic, vt_seconds: i32) -> Result<Option<QueueMessage>> {
    let row = sqlx::query_as::<_, (i64, i32, serde_json::Value)>(
        "SELECT msg_id, read_ct, message FROM pgmq.read($1, $2, 1)",
    )
    .bind(topic.queue_name())
    .bind(vt_seconds)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(msg_id, read_count, payload)| QueueMessage {
        msg_id,
        read_count,
        payload,
    }))
}

/// Commit a message: move it to the archive table so it is never redelivered.
pub async fn archive(pool: &PgPool, topic: Topic, msg_id: i64) -> Result<()> {
    sqlx::query("SELECT pgmq.archive($1, $2)")
        .bind(topic.queue_name())
        .bind(msg_id)
        .execute(pool)
        .await?;

    Ok(())
}
