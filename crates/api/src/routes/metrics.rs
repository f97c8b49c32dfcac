use std::collections::BTreeMap;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use courier_core::types::{Channel, ChannelStats};
use courier_db::queries::notifications;

use crate::{error::ApiResult, state::AppState};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/metrics", get(get_metrics))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct MetricsResponse {
    channels: BTreeMap<String, ChannelSnapshot>,
}

#[derive(Debug, Clone, Default, Serialize)]
struct ChannelSnapshot {
    sent: i64,
    failed: i64,
    avg_latency_ms: f64,
    success_rate: f64,
}

async fn get_metrics(State(state): State<AppState>) -> ApiResult<Json<MetricsResponse>> {
    let stats = notifications::channel_stats(&state.db).await?;
    Ok(Json(snapshot(stats)))
}

fn snapshot(stats: Vec<ChannelStats>) -> MetricsResponse {
    let mut channels: BTreeMap<String, ChannelSnapshot> = Channel::ALL
        .into_iter()
        .map(|channel| (channel.to_string(), ChannelSnapshot::default()))
        .collect();

    for s in stats {
        let total = s.sent + s.failed;
        let success_rate = if total > 0 {
            s.sent as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        channels.insert(
            s.channel.clone(),
            ChannelSnapshot {
                sent: s.sent,
                failed: s.failed,
                avg_latency_ms: s.avg_latency_ms,
                success_rate,
            },
        );
    }

    MetricsResponse { channels }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_fills_every_channel() {
        let resp = snapshot(vec![]);
        assert_eq!(resp.channels.len(), 3);
        assert!(resp.channels.contains_key("sms"));
        assert!(resp.channels.contains_key("email"));
        assert!(resp.channels.contains_key("push"));
        assert_eq!(resp.channels["sms"].sent, 0);
    }

    #[test]
    fn snapshot_computes_success_rate() {
        let resp = snapshot(vec![ChannelStats {
            channel: "sms".to_string(),
            sent: 9,
            failed: 1,
            avg_latency_ms: 42.5,
        }]);

        let sms = &resp.channels["sms"];
        assert_eq!(sms.sent, 9);
        assert_eq!(sms.failed, 1);
        assert!((sms.success_rate - 90.0).abs() < f64::EPSILON);
        assert!((sms.avg_latency_ms - 42.5).abs() < f64::EPSILON);
    }
}
