use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use courier_core::types::StatusUpdate;
use courier_db::broadcast::status_listener;

const HUB_CAPACITY: usize = 256;

pub struct StatusHub {
    tx: broadcast::Sender<StatusUpdate>,
}

impl StatusHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(HUB_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.tx.subscribe()
    }

    pub fn publish(&self, update: StatusUpdate) {
        // No subscribers is not an error.
        let _ = self.tx.send(update);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for StatusHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Forwards NOTIFY payloads from the store into the hub.
pub async fn run_listener(db: PgPool, hub: std::sync::Arc<StatusHub>) {
    loop {
        let mut listener = match status_listener(&db).await {
            Ok(listener) => listener,
            Err(err) => {
                error!(error = %err, "status listener connect failed");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        loop {
            match listener.recv().await {
                Ok(notification) => {
                    match serde_json::from_str::<StatusUpdate>(notification.payload()) {
                        Ok(update) => {
                            debug!(
                                notification_id = %update.notification_id,
                                status = %update.status,
                                "forwarding status update"
                            );
                            hub.publish(update);
                        }
                        Err(err) => {
                            warn!(error = %err, "ignoring malformed status payload");
                        }
                    }
                }
                Err(err) => {
                    error!(error = %err, "status listener lost, reconnecting");
                    break;
                }
            }
        }

        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use courier_core::types::Status;
    use uuid::Uuid;

    fn update(status: Status) -> StatusUpdate {
        StatusUpdate {
            notification_id: Uuid::now_v7(),
            status,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn subscribers_receive_published_updates() {
        let hub = StatusHub::new();
        let mut rx = hub.subscribe();

        let sent = update(Status::Delivered);
        hub.publish(sent.clone());

        let received = rx.recv().await.unwrap();
        assert_eq!(received.notification_id, sent.notification_id);
        assert_eq!(received.status, Status::Delivered);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_fine() {
        let hub = StatusHub::new();
        assert_eq!(hub.subscriber_count(), 0);
        hub.publish(update(Status::Failed));
    }
}
