//! Notification database operations.
//!
//! Status transitions are conditional updates; a zero-row outcome means
//! another actor moved the row first.

use chrono::{DateTime, Duration, Utc};
use sqlx::{PgConnection, PgPool, QueryBuilder};
use uuid::Uuid;

use courier_core::types::{
    ChannelStats, Notification, NotificationBatch, NotificationFilter, Status,
};
use courier_core::{Error, Result};

use crate::models::{ChannelStatsRow, NotificationRow};
use crate::queries::idempotency;

const SELECT_COLUMNS: &str = "id, batch_id, idempotency_key, channel, recipient, content, \
     priority, status, scheduled_at, sent_at, failed_at, error_message, retry_count, \
     max_retries, provider_message_id, template_id, template_variables, created_at, updated_at";

/// Insert a notification, claiming its idempotency key in the same
/// transaction; a live duplicate aborts so the caller re-reads the winner.
pub async fn create(pool: &PgPool, n: &Notification) -> Result<()> {
    let mut tx = pool.begin().await?;

    if let Some(key) = n.idempotency_key.as_deref() {
        if !idempotency::claim(&mut tx, key, n.id).await? {
            return Err(Error::DuplicateIdempotencyKey);
        }
    }

    insert(&mut tx, n).await?;
    tx.commit().await?;
    Ok(())
}

/// Insert a batch and all of its children in one transaction.
pub async fn create_batch(
    pool: &PgPool,
    batch: &NotificationBatch,
    notifications: &[Notification],
) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO notification_batches
            (id, total_count, pending_count, delivered_count, failed_count, cancelled_count, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(batch.id)
    .bind(batch.total_count)
    .bind(batch.pending_count)
    .bind(batch.delivered_count)
    .bind(batch.failed_count)
    .bind(batch.cancelled_count)
    .bind(batch.created_at)
    .execute(&mut *tx)
    .await?;

    for n in notifications {
        if let Some(key) = n.idempotency_key.as_deref() {
            if !idempotency::claim(&mut tx, key, n.id).await? {
                return Err(Error::DuplicateIdempotencyKey);
            }
        }
        insert(&mut tx, n).await?;
    }

    tx.commit().await?;
    Ok(())
}

async fn insert(conn: &mut PgConnection, n: &Notification) -> Result<()> {
    let variables = serde_json::to_value(&n.template_variables)?;

    sqlx::query(
        r#"
        INSERT INTO notifications
            (id, batch_id, idempotency_key, channel, recipient, content, priority, status,
             scheduled_at, max_retries, template_id, template_variables, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        "#,
    )
    .bind(n.id)
    .bind(n.batch_id)
    .bind(n.idempotency_key.as_deref())
    .bind(n.channel.as_str())
    .bind(&n.recipient)
    .bind(&n.content)
    .bind(n.priority.as_str())
    .bind(n.status.as_str())
    .bind(n.scheduled_at)
    .bind(n.max_retries)
    .bind(n.template_id)
    .bind(variables)
    .bind(n.created_at)
    .bind(n.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(map_idempotency_violation)?;

    Ok(())
}

pub async fn get_by_id(pool: &PgPool, id: Uuid) -> Result<Notification> {
    let row = sqlx::query_as::<_, NotificationRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM notifications WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(Error::NotificationNotFound)?;

    row.try_into()
}

/// Filtered keyset list, newest first; `id < cursor` pages without an offset.
pub async fn list(pool: &PgPool, filter: &NotificationFilter) -> Result<Vec<Notification>> {
    let mut qb = QueryBuilder::new(format!(
        "SELECT {SELECT_COLUMNS} FROM notifications WHERE 1=1"
    ));

    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(channel) = filter.channel {
        qb.push(" AND channel = ").push_bind(channel.as_str());
    }
    if let Some(batch_id) = filter.batch_id {
        qb.push(" AND batch_id = ").push_bind(batch_id);
    }
    if let Some(from) = filter.date_from {
        qb.push(" AND created_at >= ").push_bind(from);
    }
    if let Some(to) = filter.date_to {
        qb.push(" AND created_at <= ").push_bind(to);
    }
    if let Some(cursor) = filter.cursor {
        qb.push(" AND id < ").push_bind(cursor);
    }

    qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
        .push_bind(filter.effective_page_size());

    let rows: Vec<NotificationRow> = qb.build_query_as().fetch_all(pool).await?;
    rows.into_iter().map(TryInto::try_into).collect()
}

/// Persist the delivery-path fields of a non-terminal row.
pub async fn update_delivery_state(pool: &PgPool, n: &Notification) -> Result<bool> {
    let rows = delivery_update(pool, n).await?.rows_affected();
    Ok(rows > 0)
}

/// Apply a terminal transition together with its batch counter bump.
/// Returns false if another actor already finalized the row.
pub async fn finalize_delivery(pool: &PgPool, n: &Notification) -> Result<bool> {
    let mut tx = pool.begin().await?;

    let rows = delivery_update(&mut *tx, n).await?.rows_affected();
    if rows == 0 {
        return Ok(false);
    }

    if let Some(batch_id) = n.batch_id {
        increment_batch_counter(&mut tx, batch_id, n.status).await?;
    }

    tx.commit().await?;
    Ok(true)
}

async fn delivery_update<'e, E>(executor: E, n: &Notification) -> Result<sqlx::postgres::PgQueryResult>
where
    E: sqlx::PgExecutor<'e>,
{
    let result = sqlx::query(
        r#"
        UPDATE notifications
        SET status = $1,
            sent_at = $2,
            failed_at = $3,
            error_message = $4,
            retry_count = $5,
            provider_message_id = $6,
            updated_at = $7
        WHERE id = $8
          AND status NOT IN ('delivered', 'failed', 'cancelled')
        "#,
    )
    .bind(n.status.as_str())
    .bind(n.sent_at)
    .bind(n.failed_at)
    .bind(n.error_message.as_deref())
    .bind(n.retry_count)
    .bind(n.provider_message_id.as_deref())
    .bind(n.updated_at)
    .bind(n.id)
    .execute(executor)
    .await?;

    Ok(result)
}

/// Cancel a row still in `pending` or `scheduled`; anything else conflicts.
pub async fn cancel(pool: &PgPool, id: Uuid) -> Result<()> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, (Option<Uuid>,)>(
        r#"
        UPDATE notifications
        SET status = 'cancelled', updated_at = now()
        WHERE id = $1 AND status IN ('pending', 'scheduled')
        RETURNING batch_id
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((batch_id,)) = row else {
        // Distinguish a missing row from a lost race.
        let current = sqlx::query_as::<_, (String,)>("SELECT status FROM notifications WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        return Err(match current {
            Some((status,)) => Error::InvalidStatusTransition(status),
            None => Error::NotificationNotFound,
        });
    };

    if let Some(batch_id) = batch_id {
        increment_batch_counter(&mut tx, batch_id, Status::Cancelled).await?;
    }

    tx.commit().await?;
    Ok(())
}

async fn increment_batch_counter(
    conn: &mut PgConnection,
    batch_id: Uuid,
    status: Status,
) -> Result<()> {
    let column = match status {
        Status::Delivered => "delivered_count",
        Status::Failed => "failed_count",
        Status::Cancelled => "cancelled_count",
        _ => return Ok(()),
    };

    sqlx::query(&format!(
        "UPDATE notification_batches \
         SET {column} = {column} + 1, pending_count = pending_count - 1 \
         WHERE id = $1"
    ))
    .bind(batch_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Move a row back to `pending` if it is still in the observed state.
pub async fn promote_to_pending(pool: &PgPool, id: Uuid, expected: Status) -> Result<bool> {
    let rows = sqlx::query(
        "UPDATE notifications SET status = 'pending', updated_at = now() \
         WHERE id = $1 AND status = $2",
    )
    .bind(id)
    .bind(expected.as_str())
    .execute(pool)
    .await?
    .rows_affected();

    Ok(rows > 0)
}

pub async fn list_due_scheduled(pool: &PgPool, limit: i64) -> Result<Vec<Notification>> {
    let rows = sqlx::query_as::<_, NotificationRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM notifications \
         WHERE status = 'scheduled' AND scheduled_at <= now() \
         ORDER BY scheduled_at LIMIT $1"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(TryInto::try_into).collect()
}

pub async fn list_stuck_processing(
    pool: &PgPool,
    older_than: Duration,
    limit: i64,
) -> Result<Vec<Notification>> {
    let cutoff: DateTime<Utc> = Utc::now() - older_than;

    let rows = sqlx::query_as::<_, NotificationRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM notifications \
         WHERE status = 'processing' AND updated_at < $1 \
         ORDER BY updated_at LIMIT $2"
    ))
    .bind(cutoff)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(TryInto::try_into).collect()
}

pub async fn channel_stats(pool: &PgPool) -> Result<Vec<ChannelStats>> {
    let rows = sqlx::query_as::<_, ChannelStatsRow>(
        r#"
        SELECT channel,
               COUNT(*) FILTER (WHERE status = 'delivered') AS sent,
               COUNT(*) FILTER (WHERE status = 'failed') AS failed,
               COALESCE(
                   AVG(EXTRACT(EPOCH FROM (sent_at - created_at)) * 1000)
                       FILTER (WHERE status = 'delivered' AND sent_at IS NOT NULL),
                   0
               )::double precision AS avg_latency_ms
        FROM notifications
        GROUP BY channel
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Into::into).collect())
}

fn map_idempotency_violation(err: sqlx::Error) -> Error {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.code().as_deref() == Some("23505")
            && db_err
                .constraint()
                .is_some_and(|c| c.contains("idempotency_key"))
        {
            return Error::DuplicateIdempotencyKey;
        }
    }
    Error::Database(err)
}
