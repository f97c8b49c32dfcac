use sqlx::postgres::PgListener;
use sqlx::PgPool;

use courier_core::types::StatusUpdate;
use courier_core::Result;

pub const STATUS_CHANNEL: &str = "courier_status";

pub async fn notify_status(pool: &PgPool, update: &StatusUpdate) -> Result<()> {
    let payload = serde_json::to_string(update)?;

    sqlx::query("SELECT pg_notify($1, $2)")
        .bind(STATUS_CHANNEL)
        .bind(payload)
        .execute(pool)
        .await?;

    Ok(())
}

/// Opens a listener subscribed to the status channel.
pub async fn status_listener(pool: &PgPool) -> Result<PgListener> {
    let mut listener = PgListener::connect_with(pool).await?;
    listener.listen(STATUS_CHANNEL).await?;
    Ok(listener)
}
