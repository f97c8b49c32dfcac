pub mod batches;
pub mod idempotency;
pub mod notifications;
pub mod templates;
