use std::net::SocketAddr;
use std::sync::Arc;

use axum::{middleware::from_fn, middleware::from_fn_with_state, Router};
use tokio::net::TcpListener;
use tracing::info;

use courier_core::config::Settings;

mod error;
mod hub;
mod middleware;
mod routes;
mod state;

use crate::hub::StatusHub;
use crate::middleware::rate_limit::rate_limit;
use crate::middleware::request_id::request_id;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let settings = Settings::from_env()?;

    let db = courier_db::connect(&settings.database_url, 10).await?;
    courier_db::queue::ensure_topics(&db).await?;

    let redis = redis::Client::open(settings.redis_url.clone())?;

    let hub = Arc::new(StatusHub::new());
    tokio::spawn(hub::run_listener(db.clone(), hub.clone()));

    let state = AppState {
        db,
        redis,
        settings: settings.clone(),
        hub,
    };

    let v1 = routes::v1_router(state.clone())
        .layer(from_fn_with_state(state.clone(), rate_limit));

    let app = Router::new()
        .merge(routes::health_router(state.clone()))
        .merge(routes::ws_router(state.clone()))
        .merge(v1)
        .layer(from_fn(request_id))
        .layer(axum::extract::DefaultBodyLimit::max(1_048_576));

    let addr: SocketAddr = settings.api_bind.parse()?;
    info!(%addr, "starting api");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
