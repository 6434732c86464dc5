use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::store::StoreError;
use super::utils::parse_datetime;

/// A request to hide a thread until `defer_until`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferralRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub thread_id: Uuid,
    pub defer_until: DateTime<Utc>,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

impl DeferralRecord {
    pub(crate) fn new(
        user_id: Uuid,
        thread_id: Uuid,
        defer_until: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            thread_id,
            defer_until,
            processed: false,
            created_at,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.processed && self.defer_until <= now
    }
}

/// Visibility flags of a mail thread, plus the fields shown in previews.
///
/// Rows are written by mail ingestion; the deferral flow only flips
/// `is_hidden`, `is_processed` and `processed_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadState {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub participants: Vec<String>,
    pub is_hidden: bool,
    pub is_processed: bool,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
}

impl ThreadState {
    /// A visible, unprocessed thread with no preview fields.
    pub fn new(id: Uuid, user_id: Uuid) -> Self {
        Self {
            id,
            user_id,
            subject: None,
            last_message_at: None,
            participants: Vec::new(),
            is_hidden: false,
            is_processed: false,
            processed_at: None,
        }
    }
}

/// A stored message belonging to a thread. Only the remote id matters here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub thread_id: Uuid,
    #[serde(default)]
    pub remote_message_id: Option<String>,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub id: Uuid,
    pub subject: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub participants: Vec<String>,
}

impl ThreadSummary {
    pub(crate) fn missing(id: Uuid) -> Self {
        Self {
            id,
            subject: None,
            last_message_at: None,
            participants: Vec::new(),
        }
    }
}

/// A due, unprocessed deferral together with its thread preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DueDeferral {
    #[serde(flatten)]
    pub deferral: DeferralRecord,
    pub thread: ThreadSummary,
}

/// Raw defer input as received from a caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeferRequest {
    #[serde(default, alias = "threadId")]
    pub thread_id: Option<String>,
    #[serde(default, alias = "deferUntil")]
    pub defer_until: Option<String>,
}

impl DeferRequest {
    pub fn validate(&self) -> Result<(Uuid, DateTime<Utc>), DeferralError> {
        let thread_id = self
            .thread_id
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| DeferralError::Validation("thread_id is required".to_string()))?;
        let thread_id = Uuid::parse_str(thread_id)
            .map_err(|_| DeferralError::Validation(format!("invalid thread_id: {}", thread_id)))?;
        let defer_until = self
            .defer_until
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| DeferralError::Validation("defer_until is required".to_string()))?;
        let defer_until = parse_datetime(defer_until).map_err(|_| {
            DeferralError::Validation(format!("invalid defer_until: {}", defer_until))
        })?;
        Ok((thread_id, defer_until))
    }
}

/// Outcome of one sweep across every user with due deferrals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub users: usize,
    pub processed: usize,
    pub failed_users: Vec<Uuid>,
}

#[derive(Debug, thiserror::Error)]
pub enum DeferralError {
    #[error("thread {0} not found")]
    NotFound(Uuid),
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
