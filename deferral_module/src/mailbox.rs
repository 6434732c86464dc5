//! Remote mailbox mirroring.
//!
//! The local deferral record is authoritative. A mailbox adapter only mirrors
//! the snooze into the user's remote mailbox, and nothing in the deferral
//! flow waits on it succeeding.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Outcome reported by a mailbox for a snooze call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnoozeResult {
    pub success: bool,
    pub error: Option<String>,
}

impl SnoozeResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("mailbox config error: {0}")]
    Config(String),
    #[error("mailbox request failed: {0}")]
    Request(String),
    #[error("mailbox account lookup failed: {0}")]
    Lookup(String),
}

pub trait MailboxAdapter: Send + Sync {
    fn snooze(
        &self,
        remote_message_id: &str,
        until: DateTime<Utc>,
    ) -> Result<SnoozeResult, MailboxError>;
}

/// Resolves the mailbox connected for a user, if any.
///
/// `Ok(None)` is the normal answer for users without a connected mailbox.
pub trait MailboxProvider: Send + Sync {
    fn adapter_for(&self, user_id: Uuid) -> Result<Option<Arc<dyn MailboxAdapter>>, MailboxError>;
}

/// Database-only tracking: no user has a remote mailbox.
#[derive(Debug, Default, Clone)]
pub struct NoMailbox;

impl MailboxProvider for NoMailbox {
    fn adapter_for(&self, _user_id: Uuid) -> Result<Option<Arc<dyn MailboxAdapter>>, MailboxError> {
        Ok(None)
    }
}

/// Hands the same adapter to every user.
#[derive(Clone)]
pub struct SharedMailbox {
    adapter: Arc<dyn MailboxAdapter>,
}

impl SharedMailbox {
    pub fn new(adapter: Arc<dyn MailboxAdapter>) -> Self {
        Self { adapter }
    }
}

impl MailboxProvider for SharedMailbox {
    fn adapter_for(&self, _user_id: Uuid) -> Result<Option<Arc<dyn MailboxAdapter>>, MailboxError> {
        Ok(Some(self.adapter.clone()))
    }
}
