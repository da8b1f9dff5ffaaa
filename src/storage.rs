pub mod sqlite;

use std::fmt;

use chrono::{DateTime, Utc};
use error_stack::Report;
use futures::future::BoxFuture;

use crate::alert::AlertDraft;
use crate::error::StorageError;
use crate::model::Alert;

/// Persistence for alerts. Implementations are responsible for making each
/// update atomic.
pub trait AlertRepository: Send + Sync {
    fn get_active_alerts(&self) -> BoxFuture<'_, Result<Vec<Alert>, Report<StorageError>>>;

    /// Fails with `StorageError::NotFound` when no alert has this id.
    fn get_alert(&self, id: i64) -> BoxFuture<'_, Result<Alert, Report<StorageError>>>;

    fn update_alert(&self, alert: &Alert) -> BoxFuture<'_, Result<(), Report<StorageError>>>;

    /// Atomically record a trigger at `at` if the alert is still active and
    /// armed. Only the trigger columns are written. Returns `false` when the
    /// alert was already triggered, paused or deleted in the meantime.
    fn claim_trigger(
        &self,
        id: i64,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<bool, Report<StorageError>>>;

    fn insert_alert(&self, draft: &AlertDraft)
    -> BoxFuture<'_, Result<Alert, Report<StorageError>>>;

    fn list_alerts(&self) -> BoxFuture<'_, Result<Vec<Alert>, Report<StorageError>>>;

    fn delete_alert(&self, id: i64) -> BoxFuture<'_, Result<(), Report<StorageError>>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStatus {
    Sent,
    Failed,
}

impl AttemptStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One channel's outcome for one dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationAttempt {
    pub alert_id: i64,
    pub channel: String,
    pub status: AttemptStatus,
    pub message: String,
    pub error: Option<String>,
}

/// Durable record of notification attempts.
pub trait NotificationLog: Send + Sync {
    fn log_attempt(
        &self,
        attempt: &NotificationAttempt,
    ) -> BoxFuture<'_, Result<(), Report<StorageError>>>;
}
