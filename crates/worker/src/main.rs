use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use courier_core::config::Settings;
use courier_core::queue::Topic;

mod breaker;
mod consumer;
mod delivery;
mod limiter;
mod provider;
mod scheduler;

use crate::breaker::{BreakerConfig, BreakerSet};
use crate::limiter::RateLimiterSet;
use crate::provider::{DeliveryProvider, WebhookProvider};

const SHUTDOWN_WINDOW: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct WorkerState {
    pub db: sqlx::PgPool,
    pub provider: Arc<dyn DeliveryProvider>,
    pub limiters: Arc<RateLimiterSet>,
    pub breakers: Arc<BreakerSet>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let settings = Settings::from_env()?;

    let db = courier_db::connect(&settings.database_url, settings.worker_concurrency).await?;
    courier_db::queue::ensure_topics(&db).await?;

    let provider = WebhookProvider::new(&settings.webhook_url)?;

    let state = WorkerState {
        db,
        provider: Arc::new(provider),
        limiters: Arc::new(RateLimiterSet::new(settings.rate_limit_per_channel)),
        breakers: Arc::new(BreakerSet::new(BreakerConfig::default())),
    };

    let shutdown = CancellationToken::new();
    let mut tasks = Vec::new();

    for topic in Topic::ALL {
        tasks.push(tokio::spawn(consumer::run(
            state.clone(),
            topic,
            shutdown.clone(),
        )));
    }
    tasks.push(tokio::spawn(scheduler::run(state.clone(), shutdown.clone())));

    info!(
        webhook_url = %settings.webhook_url,
        rate_per_channel = settings.rate_limit_per_channel,
        "worker started"
    );

    wait_for_signal().await?;

    info!("shutting down worker gracefully");
    shutdown.cancel();

    let drain = async {
        for task in tasks {
            let _ = task.await;
        }
    };
    if tokio::time::timeout(SHUTDOWN_WINDOW, drain).await.is_err() {
        error!("shutdown window elapsed before all loops stopped");
    }

    info!("worker stopped");
    Ok(())
}

async fn wait_for_signal() -> Result<()> {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
    Ok(())
}
