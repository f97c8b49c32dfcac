use std::sync::Arc;

use sqlx::PgPool;

use courier_core::config::Settings;

use crate::hub::StatusHub;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub redis: redis::Client,
    pub settings: Settings,
    pub hub: Arc<StatusHub>,
}

#[derive(Debug, Clone)]
pub struct RequestId(pub String);
