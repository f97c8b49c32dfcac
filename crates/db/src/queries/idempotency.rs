use chrono::{Duration, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use courier_core::Result;

const TTL_HOURS: i64 = 24;

/// Returns the notification id bound to `key`, ignoring expired bindings.
pub async fn find_live(pool: &PgPool, key: &str) -> Result<Option<Uuid>> {
    let row = sqlx::query_as::<_, (Uuid,)>(
        "SELECT notification_id FROM idempotency_keys WHERE key = $1 AND expires_at > now()",
    )
    .bind(key)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(id,)| id))
}

/// Bind `key` to `notification_id`. An expired binding is overwritten in
/// place; a live one wins and `claim` returns false.
pub async fn claim(conn: &mut PgConnection, key: &str, notification_id: Uuid) -> Result<bool> {
    let expires_at = Utc::now() + Duration::hours(TTL_HOURS);

    let rows = sqlx::query(
        r#"
        INSERT INTO idempotency_keys (key, notification_id, expires_at)
        VALUES ($1, $2, $3)
        ON CONFLICT (key) DO UPDATE
            SET notification_id = EXCLUDED.notification_id,
                expires_at = EXCLUDED.expires_at
            WHERE idempotency_keys.expires_at <= now()
        "#,
    )
    .bind(key)
    .bind(notification_id)
    .bind(expires_at)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    Ok(rows > 0)
}
