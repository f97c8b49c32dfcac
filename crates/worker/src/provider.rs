use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use courier_core::types::Notification;
use courier_core::{Error, Result};

#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub message_id: String,
    pub status: String,
}

#[async_trait]
pub trait DeliveryProvider: Send + Sync {
    async fn send(&self, notification: &Notification, correlation_id: &str)
        -> Result<ProviderResponse>;
}

pub struct WebhookProvider {
    webhook_url: String,
    client: reqwest::Client,
}

impl WebhookProvider {
    pub fn new(webhook_url: &str) -> std::result::Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()?;

        Ok(Self {
            webhook_url: webhook_url.to_string(),
            client,
        })
    }
}

#[derive(Debug, Serialize)]
struct WebhookRequest<'a> {
    to: &'a str,
    channel: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct WebhookResponse {
    #[serde(rename = "messageId")]
    message_id: String,
    #[serde(default)]
    status: Option<String>,
}

#[async_trait]
impl DeliveryProvider for WebhookProvider {
    async fn send(
        &self,
        notification: &Notification,
        correlation_id: &str,
    ) -> Result<ProviderResponse> {
        let body = WebhookRequest {
            to: &notification.recipient,
            channel: notification.channel.as_str(),
            content: &notification.content,
        };

        let mut request = self.client.post(&self.webhook_url).json(&body);
        if !correlation_id.is_empty() {
            request = request.header("X-Correlation-Id", correlation_id);
        }

        let response = request
            .send()
            .await
            .map_err(|err| Error::ProviderUnavailable(err.to_string()))?;

        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| Error::ProviderUnavailable(err.to_string()))?;

        classify(status, &bytes)
    }
}

/// Turn a provider HTTP exchange into a domain outcome.
fn classify(status: u16, body: &[u8]) -> Result<ProviderResponse> {
    if is_transient_status(status) {
        return Err(Error::ProviderUnavailable(format!("status {status}")));
    }

    if status >= 400 {
        return Err(Error::ProviderRejected(format!(
            "status {status}, body: {}",
            String::from_utf8_lossy(body)
        )));
    }

    // 2xx with an unparseable body is still a success; synthesize an id.
    let parsed = serde_json::from_slice::<WebhookResponse>(body).unwrap_or_else(|_| {
        WebhookResponse {
            message_id: Uuid::new_v4().to_string(),
            status: None,
        }
    });

    Ok(ProviderResponse {
        message_id: parsed.message_id,
        status: parsed.status.unwrap_or_else(|| "accepted".to_string()),
    })
}

fn is_transient_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

#[cfg(test)]
pub mod fake {
    use std::sync::Mutex;

    use super::*;

    /// Scripted provider for coordinator tests: pops one queued outcome per
    /// send call.
    pub struct FakeProvider {
        outcomes: Mutex<Vec<Result<ProviderResponse>>>,
    }

    impl FakeProvider {
        pub fn with_outcomes(mut outcomes: Vec<Result<ProviderResponse>>) -> Self {
            outcomes.reverse();
            Self {
                outcomes: Mutex::new(outcomes),
            }
        }
    }

    #[async_trait]
    impl DeliveryProvider for FakeProvider {
        async fn send(&self, _n: &Notification, _correlation_id: &str) -> Result<ProviderResponse> {
            self.outcomes
                .lock()
                .expect("fake outcomes")
                .pop()
                .unwrap_or_else(|| Err(Error::ProviderUnavailable("no outcome queued".into())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_class_statuses_are_transient() {
        for status in [429u16, 500, 502, 503, 504] {
            let err = classify(status, b"").unwrap_err();
            assert!(err.is_transient(), "status {status} should be transient");
        }
    }

    #[test]
    fn other_client_errors_are_permanent() {
        for status in [400u16, 401, 403, 404, 422] {
            let err = classify(status, b"nope").unwrap_err();
            assert!(!err.is_transient(), "status {status} should be permanent");
            assert!(matches!(err, Error::ProviderRejected(_)));
        }
    }

    #[test]
    fn success_uses_returned_message_id() {
        let body = br#"{"messageId":"abc","status":"accepted","timestamp":"2026-01-01T00:00:00Z"}"#;
        let resp = classify(202, body).unwrap();
        assert_eq!(resp.message_id, "abc");
        assert_eq!(resp.status, "accepted");
    }

    #[test]
    fn success_with_unparseable_body_synthesizes_id() {
        let resp = classify(200, b"not json").unwrap();
        assert!(!resp.message_id.is_empty());
        assert_eq!(resp.status, "accepted");
        assert!(Uuid::parse_str(&resp.message_id).is_ok());
    }

    #[tokio::test]
    async fn fake_provider_replays_script() {
        use fake::FakeProvider;

        let provider = FakeProvider::with_outcomes(vec![
            Err(Error::ProviderUnavailable("status 503".into())),
            Ok(ProviderResponse {
                message_id: "m1".into(),
                status: "accepted".into(),
            }),
        ]);

        let n = Notification::new(
            courier_core::types::Channel::Sms,
            "+905530050594",
            "hi",
            courier_core::types::Priority::Normal,
            None,
        )
        .unwrap();

        assert!(provider.send(&n, "req_1").await.is_err());
        assert_eq!(provider.send(&n, "req_1").await.unwrap().message_id, "m1");
    }
}
