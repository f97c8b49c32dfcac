use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, Instrument};

use courier_core::queue::{reentry_delay, DeliveryMessage, Topic};
use courier_core::Error;
use courier_db::queue::{self, QueueMessage};

use crate::delivery;
use crate::WorkerState;

const VISIBILITY_TIMEOUT_SECS: i32 = 60;
const EMPTY_POLL_DELAY: Duration = Duration::from_millis(250);
const FETCH_ERROR_DELAY: Duration = Duration::from_secs(1);

pub async fn run(state: WorkerState, topic: Topic, shutdown: CancellationToken) {
    info!(topic = topic.as_str(), "consumer started");

    loop {
        let fetched = tokio::select! {
            _ = shutdown.cancelled() => break,
            fetched = queue::read(&state.db, topic, VISIBILITY_TIMEOUT_SECS) => fetched,
        };

        let message = match fetched {
            Ok(Some(message)) => message,
            Ok(None) => {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(EMPTY_POLL_DELAY) => {}
                }
                continue;
            }
            Err(err) => {
                error!(topic = topic.as_str(), error = %err, "queue fetch failed");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(FETCH_ERROR_DELAY) => {}
                }
                continue;
            }
        };

        handle_message(&state, topic, message, &shutdown).await;
    }

    info!(topic = topic.as_str(), "consumer stopped");
}

async fn handle_message(
    state: &WorkerState,
    topic: Topic,
    message: QueueMessage,
    shutdown: &CancellationToken,
) {
    let payload: DeliveryMessage = match serde_json::from_value(message.payload.clone()) {
        Ok(payload) => payload,
        Err(err) => {
            // Poison pill: commit and drop so the topic keeps moving.
            error!(
                topic = topic.as_str(),
                msg_id = message.msg_id,
                error = %err,
                "dropping unparseable message"
            );
            commit(state, topic, message.msg_id).await;
            return;
        }
    };

    let correlation_id = payload.correlation_id().unwrap_or("").to_string();
    let span = tracing::info_span!(
        "consume",
        topic = topic.as_str(),
        notification_id = %payload.notification_id,
        msg_id = message.msg_id,
        correlation_id = %correlation_id,
    );

    async {
        // Per-channel throttle. On shutdown the lease is simply abandoned
        // and the message reappears after the visibility timeout.
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = state.limiters.acquire(payload.channel) => {}
        }

        debug!("processing notification");

        match delivery::process(state, payload.notification_id, &correlation_id).await {
            Ok(()) => commit(state, topic, message.msg_id).await,
            Err(err) if is_retryable(&err) => {
                let delay = reentry_delay();
                debug!(delay_ms = delay.as_millis() as u64, "re-publishing for retry");
                match queue::publish_raw_delayed(&state.db, topic, &message.payload, delay).await {
                    Ok(_) => commit(state, topic, message.msg_id).await,
                    Err(publish_err) => {
                        // Keep the lease; the visibility timeout redelivers
                        // the original instead.
                        error!(error = %publish_err, "retry re-publish failed");
                    }
                }
            }
            Err(err) => {
                error!(error = %err, "dropping message with permanent error");
                commit(state, topic, message.msg_id).await;
            }
        }
    }
    .instrument(span)
    .await;
}

fn is_retryable(err: &Error) -> bool {
    err.is_transient() || matches!(err, Error::Database(_))
}

async fn commit(state: &WorkerState, topic: Topic, msg_id: i64) {
    if let Err(err) = queue::archive(&state.db, topic, msg_id).await {
        error!(topic = topic.as_str(), msg_id, error = %err, "commit failed");
    }
}
