use sqlx::PgPool;
use uuid::Uuid;

use courier_core::types::NotificationBatch;
use courier_core::{Error, Result};

use crate::models::BatchRow;

pub async fn get_by_id(pool: &PgPool, id: Uuid) -> Result<NotificationBatch> {
    let row = sqlx::query_as::<_, BatchRow>(
        r#"
        SELECT id, total_count, pending_count, delivered_count, failed_count,
               cancelled_count, created_at
        FROM notification_batches
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(Error::BatchNotFound)?;

    Ok(row.into())
}
