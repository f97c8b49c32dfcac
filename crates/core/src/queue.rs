use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Channel, Notification, Priority};

/// Carrier key under which intake propagates its request id to the worker.
pub const CORRELATION_KEY: &str = "correlation_id";

/// One topic per priority tier, each drained by its own consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    High,
    Normal,
    Low,
}

impl Topic {
    pub const ALL: [Topic; 3] = [Topic::High, Topic::Normal, Topic::Low];

    pub fn for_priority(priority: Priority) -> Topic {
        match priority {
            Priority::High => Topic::High,
            Priority::Normal => Topic::Normal,
            Priority::Low => Topic::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::High => "notifications.high",
            Topic::Normal => "notifications.normal",
            Topic::Low => "notifications.low",
        }
    }

    /// Backing queue identifier; pgmq queue names are SQL identifiers.
    pub fn queue_name(&self) -> &'static str {
        match self {
            Topic::High => "notifications_high",
            Topic::Normal => "notifications_normal",
            Topic::Low => "notifications_low",
        }
    }
}

/// The message value published to a priority topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryMessage {
    pub notification_id: Uuid,
    pub channel: Channel,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub carrier: BTreeMap<String, String>,
}

impl DeliveryMessage {
    pub fn for_notification(n: &Notification) -> Self {
        Self {
            notification_id: n.id,
            channel: n.channel,
            carrier: BTreeMap::new(),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: &str) -> Self {
        self.carrier
            .insert(CORRELATION_KEY.to_string(), correlation_id.to_string());
        self
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.carrier.get(CORRELATION_KEY).map(String::as_str)
    }
}

const REENTRY_BASE: Duration = Duration::from_secs(2);
const REENTRY_JITTER_MS: u64 = 1_000;
const REENTRY_CAP: Duration = Duration::from_secs(30);

/// Delay before a transient outcome is re-published to its topic. The retry
/// budget itself lives on the row and is enforced by the coordinator.
pub fn reentry_delay() -> Duration {
    let jitter = Duration::from_millis(rand::random::<u64>() % REENTRY_JITTER_MS);
    let delay = REENTRY_BASE + jitter;
    delay.min(REENTRY_CAP)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Priority;

    #[test]
    fn topics_route_by_priority() {
        assert_eq!(Topic::for_priority(Priority::High), Topic::High);
        assert_eq!(Topic::for_priority(Priority::Normal), Topic::Normal);
        assert_eq!(Topic::for_priority(Priority::Low), Topic::Low);
        assert_eq!(Topic::High.as_str(), "notifications.high");
        assert_eq!(Topic::Low.queue_name(), "notifications_low");
    }

    #[test]
    fn payload_wire_format() {
        let id = Uuid::now_v7();
        let msg = DeliveryMessage {
            notification_id: id,
            channel: Channel::Sms,
            carrier: BTreeMap::new(),
        }
        .with_correlation_id("req_abc");

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["notification_id"], id.to_string());
        assert_eq!(json["channel"], "sms");
        assert_eq!(json["carrier"]["correlation_id"], "req_abc");

        let back: DeliveryMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
        assert_eq!(back.correlation_id(), Some("req_abc"));
    }

    #[test]
    fn empty_carrier_is_omitted_and_defaulted() {
        let msg = DeliveryMessage {
            notification_id: Uuid::now_v7(),
            channel: Channel::Push,
            carrier: BTreeMap::new(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("carrier").is_none());

        let back: DeliveryMessage = serde_json::from_value(json).unwrap();
        assert!(back.carrier.is_empty());
    }

    #[test]
    fn reentry_delay_bounds() {
        for _ in 0..100 {
            let d = reentry_delay();
            assert!(d >= Duration::from_secs(2));
            assert!(d < Duration::from_secs(3));
            assert!(d <= Duration::from_secs(30));
        }
    }
}
