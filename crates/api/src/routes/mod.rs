pub mod batches;
pub mod health;
pub mod metrics;
pub mod notifications;
pub mod templates;
pub mod ws;

use axum::Router;

use crate::state::AppState;

pub fn v1_router(state: AppState) -> Router {
    Router::new()
        .merge(notifications::router(state.clone()))
        .merge(batches::router(state.clone()))
        .merge(templates::router(state.clone()))
        .merge(metrics::router(state))
}

pub fn health_router(state: AppState) -> Router {
    health::router(state)
}

pub fn ws_router(state: AppState) -> Router {
    ws::router(state)
}
