use std::time::Instant;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use courier_core::types::{Notification, Status, StatusUpdate};
use courier_core::{Error, Result};
use courier_db::queries::notifications;

use crate::provider::ProviderResponse;
use crate::WorkerState;

pub async fn process(state: &WorkerState, id: Uuid, correlation_id: &str) -> Result<()> {
    let mut n = notifications::get_by_id(&state.db, id).await?;

    if matches!(n.status, Status::Cancelled | Status::Delivered) {
        debug!(id = %n.id, status = %n.status, "skipping; nothing to deliver");
        return Ok(());
    }

    n.mark_processing();
    if !notifications::update_delivery_state(&state.db, &n).await? {
        debug!(id = %n.id, "row reached a terminal state since fetch, skipping");
        return Ok(());
    }

    let breaker = state.breakers.get(n.channel);
    let started = Instant::now();
    let result = if breaker.try_acquire() {
        let outcome = state.provider.send(&n, correlation_id).await;
        if outcome.is_ok() {
            breaker.on_success();
        } else {
            breaker.on_failure();
        }
        outcome
    } else {
        debug!(channel = %n.channel, state = %breaker.state(), "breaker rejected delivery");
        Err(Error::CircuitOpen)
    };
    let latency_ms = started.elapsed().as_millis() as u64;

    match resolve_attempt(&mut n, result) {
        Attempt::Retry(err) => {
            // The row stays `processing` until the re-delivery promotes it
            // back through `pending`; the stuck sweep reclaims it if the
            // retry never lands.
            if !notifications::update_delivery_state(&state.db, &n).await? {
                return Ok(());
            }
            warn!(
                id = %n.id,
                retry = n.retry_count,
                max_retries = n.max_retries,
                error = %err,
                "delivery failed, will retry"
            );
            Err(err)
        }
        Attempt::Failed(reason) => {
            if notifications::finalize_delivery(&state.db, &n).await? {
                broadcast_status(state, &n).await;
            }
            error!(id = %n.id, retries = n.retry_count, error = %reason, "delivery permanently failed");
            Ok(())
        }
        Attempt::Delivered(resp) => {
            if notifications::finalize_delivery(&state.db, &n).await? {
                broadcast_status(state, &n).await;
            }
            info!(
                id = %n.id,
                provider_message_id = %resp.message_id,
                latency_ms,
                "notification delivered"
            );
            Ok(())
        }
    }
}

enum Attempt {
    Retry(Error),
    Failed(String),
    Delivered(ProviderResponse),
}

/// Apply one provider outcome to the row. Transient errors within the retry
/// budget keep the row alive; everything else is finalized in place.
fn resolve_attempt(n: &mut Notification, result: Result<ProviderResponse>) -> Attempt {
    match result {
        Ok(resp) => {
            n.mark_delivered(&resp.message_id);
            Attempt::Delivered(resp)
        }
        Err(err) => {
            n.increment_retry();
            if err.is_transient() && n.has_retries_left() {
                return Attempt::Retry(err);
            }
            let reason = err.to_string();
            n.mark_failed(&reason);
            Attempt::Failed(reason)
        }
    }
}

async fn broadcast_status(state: &WorkerState, n: &Notification) {
    // Fire and forget: a lost event never rolls back the store transition.
    let update = StatusUpdate::of(n);
    if let Err(err) = courier_db::broadcast::notify_status(&state.db, &update).await {
        warn!(id = %n.id, error = %err, "status broadcast failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::types::{Channel, Priority};

    fn notification(priority: Priority) -> Notification {
        let mut n =
            Notification::new(Channel::Sms, "+905530050594", "hi", priority, None).unwrap();
        n.mark_processing();
        n
    }

    fn ok_response(id: &str) -> Result<ProviderResponse> {
        Ok(ProviderResponse {
            message_id: id.to_string(),
            status: "accepted".to_string(),
        })
    }

    #[test]
    fn success_marks_delivered() {
        let mut n = notification(Priority::Normal);
        let attempt = resolve_attempt(&mut n, ok_response("abc"));

        assert!(matches!(attempt, Attempt::Delivered(_)));
        assert_eq!(n.status, Status::Delivered);
        assert_eq!(n.provider_message_id.as_deref(), Some("abc"));
        assert_eq!(n.retry_count, 0);
    }

    #[test]
    fn transient_within_budget_retries() {
        let mut n = notification(Priority::Normal);
        let attempt = resolve_attempt(&mut n, Err(Error::ProviderUnavailable("status 503".into())));

        assert!(matches!(attempt, Attempt::Retry(_)));
        assert_eq!(n.status, Status::Processing);
        assert_eq!(n.retry_count, 1);
    }

    #[test]
    fn transient_after_success_on_second_attempt() {
        let mut n = notification(Priority::Normal);
        resolve_attempt(&mut n, Err(Error::ProviderUnavailable("status 503".into())));
        let attempt = resolve_attempt(&mut n, ok_response("abc"));

        assert!(matches!(attempt, Attempt::Delivered(_)));
        assert_eq!(n.status, Status::Delivered);
        assert_eq!(n.retry_count, 1);
    }

    #[test]
    fn transient_exhaustion_fails_at_max_retries() {
        let mut n = notification(Priority::Normal);

        for attempt in 1..=3 {
            let outcome =
                resolve_attempt(&mut n, Err(Error::ProviderUnavailable("status 503".into())));
            if attempt < 3 {
                assert!(matches!(outcome, Attempt::Retry(_)));
            } else {
                assert!(matches!(outcome, Attempt::Failed(_)));
            }
        }

        assert_eq!(n.status, Status::Failed);
        assert_eq!(n.retry_count, 3);
        assert_eq!(n.retry_count, n.max_retries);
        assert!(n.error_message.as_deref().unwrap().contains("unavailable"));
    }

    #[test]
    fn retry_budget_follows_priority() {
        for (priority, budget) in [(Priority::High, 5), (Priority::Normal, 3), (Priority::Low, 2)] {
            let mut n = notification(priority);
            let mut attempts = 0;
            loop {
                attempts += 1;
                match resolve_attempt(
                    &mut n,
                    Err(Error::ProviderUnavailable("status 503".into())),
                ) {
                    Attempt::Retry(_) => continue,
                    Attempt::Failed(_) => break,
                    Attempt::Delivered(_) => unreachable!(),
                }
            }
            assert_eq!(attempts, budget);
            assert_eq!(n.retry_count, budget);
        }
    }

    #[test]
    fn permanent_error_fails_immediately() {
        let mut n = notification(Priority::High);
        let attempt = resolve_attempt(
            &mut n,
            Err(Error::ProviderRejected("status 400, body: bad".into())),
        );

        assert!(matches!(attempt, Attempt::Failed(_)));
        assert_eq!(n.status, Status::Failed);
        assert_eq!(n.retry_count, 1);
        assert!(n.failed_at.is_some());
    }

    #[test]
    fn breaker_rejection_counts_as_transient() {
        let mut n = notification(Priority::Normal);
        let attempt = resolve_attempt(&mut n, Err(Error::CircuitOpen));
        assert!(matches!(attempt, Attempt::Retry(_)));
    }
}
