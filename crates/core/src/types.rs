//! Domain types for Courier.
//!
//! Storage-agnostic: the db crate maps these onto rows, the api crate onto
//! wire DTOs. Status transitions are centralized on [`Notification`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Delivery channel; selects validation, content limit and limiter bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Sms,
    Email,
    Push,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Sms, Channel::Email, Channel::Push];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Sms => "sms",
            Channel::Email => "email",
            Channel::Push => "push",
        }
    }

    /// Maximum content size in bytes.
    pub fn content_limit(&self) -> usize {
        match self {
            Channel::Sms => 160,
            Channel::Email => 10_000,
            Channel::Push => 4_096,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sms" => Ok(Channel::Sms),
            "email" => Ok(Channel::Email),
            "push" => Ok(Channel::Push),
            other => Err(Error::InvalidChannel(other.to_string())),
        }
    }
}

/// Delivery priority. Selects the log topic and the retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }

    pub fn max_retries(&self) -> i32 {
        match self {
            Priority::High => 5,
            Priority::Normal => 3,
            Priority::Low => 2,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            other => Err(Error::InvalidPriority(other.to_string())),
        }
    }
}

/// Lifecycle status; a row never leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Scheduled,
    Processing,
    Delivered,
    Failed,
    Cancelled,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Scheduled => "scheduled",
            Status::Processing => "processing",
            Status::Delivered => "delivered",
            Status::Failed => "failed",
            Status::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Delivered | Status::Failed | Status::Cancelled)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Status::Pending),
            "scheduled" => Ok(Status::Scheduled),
            "processing" => Ok(Status::Processing),
            "delivered" => Ok(Status::Delivered),
            "failed" => Ok(Status::Failed),
            "cancelled" => Ok(Status::Cancelled),
            other => Err(Error::InvalidStatus(other.to_string())),
        }
    }
}

static E164_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+[1-9]\d{6,14}$").expect("e164 regex"));
static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+\-]+@[a-zA-Z0-9.\-]+\.[a-zA-Z]{2,}$").expect("email regex")
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub batch_id: Option<Uuid>,
    pub idempotency_key: Option<String>,
    pub channel: Channel,
    pub recipient: String,
    pub content: String,
    pub priority: Priority,
    pub status: Status,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub provider_message_id: Option<String>,
    pub template_id: Option<Uuid>,
    pub template_variables: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Notification {
    /// Validates and builds a new notification with a time-ordered v7 id.
    pub fn new(
        channel: Channel,
        recipient: &str,
        content: &str,
        priority: Priority,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        validate_recipient(channel, recipient)?;
        validate_content(channel, content)?;

        let now = Utc::now();
        let status = if scheduled_at.is_some() {
            Status::Scheduled
        } else {
            Status::Pending
        };

        Ok(Self {
            id: Uuid::now_v7(),
            batch_id: None,
            idempotency_key: None,
            channel,
            recipient: recipient.to_string(),
            content: content.to_string(),
            priority,
            status,
            scheduled_at,
            sent_at: None,
            failed_at: None,
            error_message: None,
            retry_count: 0,
            max_retries: priority.max_retries(),
            provider_message_id: None,
            template_id: None,
            template_variables: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn can_cancel(&self) -> bool {
        matches!(self.status, Status::Pending | Status::Scheduled)
    }

    pub fn cancel(&mut self) -> Result<()> {
        if !self.can_cancel() {
            return Err(Error::InvalidStatusTransition(self.status.to_string()));
        }
        self.status = Status::Cancelled;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn mark_processing(&mut self) {
        self.status = Status::Processing;
        self.updated_at = Utc::now();
    }

    pub fn mark_delivered(&mut self, provider_message_id: &str) {
        let now = Utc::now();
        self.status = Status::Delivered;
        self.provider_message_id = Some(provider_message_id.to_string());
        self.sent_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_failed(&mut self, error: &str) {
        let now = Utc::now();
        self.status = Status::Failed;
        self.error_message = Some(error.to_string());
        self.failed_at = Some(now);
        self.updated_at = now;
    }

    pub fn increment_retry(&mut self) {
        self.retry_count += 1;
        self.updated_at = Utc::now();
    }

    pub fn has_retries_left(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

fn validate_recipient(channel: Channel, recipient: &str) -> Result<()> {
    if recipient.is_empty() {
        return Err(Error::EmptyRecipient);
    }

    match channel {
        Channel::Sms => {
            if !E164_RE.is_match(recipient) {
                return Err(Error::InvalidRecipient("must be E.164 format".to_string()));
            }
        }
        Channel::Email => {
            if !EMAIL_RE.is_match(recipient) {
                return Err(Error::InvalidRecipient("must be valid email".to_string()));
            }
        }
        // Device tokens are opaque; non-empty is all we can check.
        Channel::Push => {}
    }

    Ok(())
}

fn validate_content(channel: Channel, content: &str) -> Result<()> {
    if content.is_empty() {
        return Err(Error::EmptyContent);
    }

    let limit = channel.content_limit();
    if content.len() > limit {
        return Err(Error::ContentTooLong { channel, limit });
    }

    Ok(())
}

/// Batch counters; at rest `pending + delivered + failed + cancelled == total`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationBatch {
    pub id: Uuid,
    pub total_count: i32,
    pub pending_count: i32,
    pub delivered_count: i32,
    pub failed_count: i32,
    pub cancelled_count: i32,
    pub created_at: DateTime<Utc>,
}

impl NotificationBatch {
    pub fn new(total: i32) -> Self {
        Self {
            id: Uuid::now_v7(),
            total_count: total,
            pending_count: total,
            delivered_count: 0,
            failed_count: 0,
            cancelled_count: 0,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NotificationFilter {
    pub status: Option<Status>,
    pub channel: Option<Channel>,
    pub batch_id: Option<Uuid>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub cursor: Option<Uuid>,
    pub page_size: i64,
}

impl NotificationFilter {
    pub const DEFAULT_PAGE_SIZE: i64 = 20;
    pub const MAX_PAGE_SIZE: i64 = 100;

    pub fn effective_page_size(&self) -> i64 {
        if self.page_size <= 0 || self.page_size > Self::MAX_PAGE_SIZE {
            Self::DEFAULT_PAGE_SIZE
        } else {
            self.page_size
        }
    }
}

/// Per-channel delivery aggregates, derived from the store.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStats {
    pub channel: String,
    pub sent: i64,
    pub failed: i64,
    pub avg_latency_ms: f64,
}

/// Payload pushed to status subscribers whenever a row reaches a new status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub notification_id: Uuid,
    pub status: Status,
    pub timestamp: DateTime<Utc>,
}

impl StatusUpdate {
    pub fn of(n: &Notification) -> Self {
        Self {
            notification_id: n.id,
            status: n.status,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sms(recipient: &str, content: &str) -> Result<Notification> {
        Notification::new(Channel::Sms, recipient, content, Priority::Normal, None)
    }

    #[test]
    fn new_notification_defaults() {
        let n = sms("+905530050594", "Hello").unwrap();
        assert_eq!(n.status, Status::Pending);
        assert_eq!(n.retry_count, 0);
        assert_eq!(n.max_retries, 3);
        assert!(n.scheduled_at.is_none());
    }

    #[test]
    fn scheduled_notification_starts_scheduled() {
        let at = Utc::now() + chrono::Duration::hours(1);
        let n = Notification::new(Channel::Sms, "+905530050594", "hi", Priority::Low, Some(at))
            .unwrap();
        assert_eq!(n.status, Status::Scheduled);
        assert_eq!(n.max_retries, 2);
    }

    #[test]
    fn max_retries_follow_priority() {
        assert_eq!(Priority::High.max_retries(), 5);
        assert_eq!(Priority::Normal.max_retries(), 3);
        assert_eq!(Priority::Low.max_retries(), 2);
    }

    #[test]
    fn sms_recipient_must_be_e164() {
        assert!(matches!(
            sms("05530050594", "hi").unwrap_err(),
            Error::InvalidRecipient(_)
        ));
        assert!(matches!(
            sms("+0123", "hi").unwrap_err(),
            Error::InvalidRecipient(_)
        ));
        assert!(sms("+905530050594", "hi").is_ok());
    }

    #[test]
    fn email_recipient_validated() {
        let ok = Notification::new(Channel::Email, "a@b.co", "hi", Priority::Normal, None);
        assert!(ok.is_ok());
        let bad = Notification::new(Channel::Email, "not-an-email", "hi", Priority::Normal, None);
        assert!(matches!(bad.unwrap_err(), Error::InvalidRecipient(_)));
    }

    #[test]
    fn push_recipient_only_requires_presence() {
        let ok = Notification::new(Channel::Push, "device-token-1", "hi", Priority::High, None);
        assert!(ok.is_ok());
        let bad = Notification::new(Channel::Push, "", "hi", Priority::High, None);
        assert!(matches!(bad.unwrap_err(), Error::EmptyRecipient));
    }

    #[test]
    fn content_limits_are_exact() {
        let at_limit = "x".repeat(160);
        assert!(sms("+905530050594", &at_limit).is_ok());

        let over = "x".repeat(161);
        assert!(matches!(
            sms("+905530050594", &over).unwrap_err(),
            Error::ContentTooLong { limit: 160, .. }
        ));

        let push_over = "x".repeat(4097);
        let bad = Notification::new(Channel::Push, "tok", &push_over, Priority::Normal, None);
        assert!(matches!(
            bad.unwrap_err(),
            Error::ContentTooLong { limit: 4096, .. }
        ));
    }

    #[test]
    fn empty_content_rejected() {
        assert!(matches!(
            sms("+905530050594", "").unwrap_err(),
            Error::EmptyContent
        ));
    }

    #[test]
    fn cancel_only_from_pending_or_scheduled() {
        let mut n = sms("+905530050594", "hi").unwrap();
        assert!(n.cancel().is_ok());
        assert_eq!(n.status, Status::Cancelled);

        // Terminal rows never transition again.
        assert!(matches!(
            n.cancel().unwrap_err(),
            Error::InvalidStatusTransition(_)
        ));

        let mut p = sms("+905530050594", "hi").unwrap();
        p.mark_processing();
        assert!(!p.can_cancel());
        assert!(p.cancel().is_err());
    }

    #[test]
    fn delivered_records_provider_id_and_sent_at() {
        let mut n = sms("+905530050594", "hi").unwrap();
        n.mark_processing();
        n.mark_delivered("abc");
        assert_eq!(n.status, Status::Delivered);
        assert_eq!(n.provider_message_id.as_deref(), Some("abc"));
        let sent = n.sent_at.unwrap();
        assert!(sent >= n.created_at);
    }

    #[test]
    fn failed_records_error_message() {
        let mut n = sms("+905530050594", "hi").unwrap();
        n.mark_processing();
        n.mark_failed("provider said no");
        assert_eq!(n.status, Status::Failed);
        assert_eq!(n.error_message.as_deref(), Some("provider said no"));
        assert!(n.failed_at.is_some());
    }

    #[test]
    fn retry_budget() {
        let mut n = sms("+905530050594", "hi").unwrap();
        assert!(n.has_retries_left());
        for _ in 0..3 {
            n.increment_retry();
        }
        assert_eq!(n.retry_count, 3);
        assert!(!n.has_retries_left());
    }

    #[test]
    fn status_round_trips_through_str() {
        for s in [
            Status::Pending,
            Status::Scheduled,
            Status::Processing,
            Status::Delivered,
            Status::Failed,
            Status::Cancelled,
        ] {
            assert_eq!(Status::from_str(s.as_str()).unwrap(), s);
        }
        assert!(Status::from_str("bogus").is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(Status::Delivered.is_terminal());
        assert!(Status::Failed.is_terminal());
        assert!(Status::Cancelled.is_terminal());
        assert!(!Status::Pending.is_terminal());
        assert!(!Status::Scheduled.is_terminal());
        assert!(!Status::Processing.is_terminal());
    }

    #[test]
    fn filter_page_size_clamped() {
        let mut f = NotificationFilter::default();
        assert_eq!(f.effective_page_size(), 20);
        f.page_size = 50;
        assert_eq!(f.effective_page_size(), 50);
        f.page_size = 101;
        assert_eq!(f.effective_page_size(), 20);
        f.page_size = -1;
        assert_eq!(f.effective_page_size(), 20);
    }

    #[test]
    fn batch_counters_start_pending() {
        let b = NotificationBatch::new(10);
        assert_eq!(b.total_count, 10);
        assert_eq!(b.pending_count, 10);
        assert_eq!(
            b.pending_count + b.delivered_count + b.failed_count + b.cancelled_count,
            b.total_count
        );
    }
}
