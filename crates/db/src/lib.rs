pub mod broadcast;
pub mod models;
pub mod queries;
pub mod queue;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Opens a connection pool against the notification store.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
