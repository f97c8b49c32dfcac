use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use courier_core::queue::{DeliveryMessage, Topic};
use courier_core::types::{Notification, Status};
use courier_core::Result;
use courier_db::queries::notifications;
use courier_db::queue;

use crate::WorkerState;

const TICK_INTERVAL: Duration = Duration::from_secs(5);
const DUE_BATCH_SIZE: i64 = 100;
const STUCK_BATCH_SIZE: i64 = 50;
const STUCK_THRESHOLD_MINUTES: i64 = 5;

pub async fn run(state: WorkerState, shutdown: CancellationToken) {
    info!("scheduler started");
    let mut ticker = tokio::time::interval(TICK_INTERVAL);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                promote_due(&state).await;
                recover_stuck(&state).await;
            }
        }
    }

    info!("scheduler stopped");
}

async fn promote_due(state: &WorkerState) {
    let due = match notifications::list_due_scheduled(&state.db, DUE_BATCH_SIZE).await {
        Ok(due) => due,
        Err(err) => {
            error!(error = %err, "failed to list due scheduled notifications");
            return;
        }
    };

    let mut promoted = 0usize;
    for n in due {
        let id = n.id;
        match promote(state, n, Status::Scheduled).await {
            Ok(true) => promoted += 1,
            Ok(false) => {}
            // Left for the next tick.
            Err(err) => error!(id = %id, error = %err, "failed to promote scheduled notification"),
        }
    }

    if promoted > 0 {
        info!(count = promoted, "promoted due scheduled notifications");
    }
}

async fn recover_stuck(state: &WorkerState) {
    let stuck = match notifications::list_stuck_processing(
        &state.db,
        chrono::Duration::minutes(STUCK_THRESHOLD_MINUTES),
        STUCK_BATCH_SIZE,
    )
    .await
    {
        Ok(stuck) => stuck,
        Err(err) => {
            error!(error = %err, "failed to list stuck notifications");
            return;
        }
    };

    let mut recovered = 0usize;
    for n in stuck {
        let id = n.id;
        match promote(state, n, Status::Processing).await {
            Ok(true) => recovered += 1,
            Ok(false) => {}
            Err(err) => error!(id = %id, error = %err, "failed to reclaim stuck notification"),
        }
    }

    if recovered > 0 {
        warn!(count = recovered, "recovered stuck notifications");
    }
}

async fn promote(state: &WorkerState, mut n: Notification, expected: Status) -> Result<bool> {
    if !notifications::promote_to_pending(&state.db, n.id, expected).await? {
        // Cancelled or picked up since the sweep read it.
        return Ok(false);
    }

    n.status = Status::Pending;
    let message = DeliveryMessage::for_notification(&n);
    queue::publish(&state.db, Topic::for_priority(n.priority), &message).await?;
    Ok(true)
}
