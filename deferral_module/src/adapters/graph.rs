//! Microsoft Graph mailbox adapter.
//!
//! - `GraphMailboxAdapter`: snoozes one user's messages through Graph
//! - `GraphMailboxProvider`: builds an adapter from the user's stored token

use chrono::{DateTime, Utc};
use graph_mail_module::{GraphClient, GraphError, DEFAULT_GRAPH_BASE_URL, DEFAULT_GRAPH_TIMEOUT};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::deferral::MailAccountStore;
use crate::mailbox::{MailboxAdapter, MailboxError, MailboxProvider, SnoozeResult};

#[derive(Debug, Clone)]
pub struct GraphMailboxAdapter {
    client: GraphClient,
}

impl GraphMailboxAdapter {
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }
}

impl MailboxAdapter for GraphMailboxAdapter {
    fn snooze(
        &self,
        remote_message_id: &str,
        until: DateTime<Utc>,
    ) -> Result<SnoozeResult, MailboxError> {
        match self.client.snooze_message(remote_message_id, until) {
            Ok(()) => Ok(SnoozeResult::ok()),
            Err(GraphError::Api { status, message }) => {
                Ok(SnoozeResult::failed(format!("graph returned {}: {}", status, message)))
            }
            Err(GraphError::Http(err)) => Err(MailboxError::Request(err.to_string())),
            Err(err) => Err(MailboxError::Config(err.to_string())),
        }
    }
}

/// Builds a Graph adapter per user from the mail account table.
///
/// Falls back to a shared token when one is configured, which keeps
/// single-mailbox deployments working without an account row.
#[derive(Clone)]
pub struct GraphMailboxProvider {
    accounts: Arc<dyn MailAccountStore>,
    base_url: String,
    timeout: Duration,
    fallback_token: Option<String>,
}

impl GraphMailboxProvider {
    pub fn new(accounts: Arc<dyn MailAccountStore>) -> Self {
        Self {
            accounts,
            base_url: DEFAULT_GRAPH_BASE_URL.to_string(),
            timeout: DEFAULT_GRAPH_TIMEOUT,
            fallback_token: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_fallback_token(mut self, token: Option<String>) -> Self {
        self.fallback_token = token.filter(|value| !value.trim().is_empty());
        self
    }
}

impl MailboxProvider for GraphMailboxProvider {
    fn adapter_for(&self, user_id: Uuid) -> Result<Option<Arc<dyn MailboxAdapter>>, MailboxError> {
        let token = self
            .accounts
            .mail_access_token(user_id)
            .map_err(|err| MailboxError::Lookup(err.to_string()))?
            .or_else(|| self.fallback_token.clone());
        let Some(token) = token else {
            debug!("no graph mailbox connected for user {}", user_id);
            return Ok(None);
        };
        let client = GraphClient::with_base_url(&token, &self.base_url, self.timeout)
            .map_err(|err| MailboxError::Config(err.to_string()))?;
        Ok(Some(Arc::new(GraphMailboxAdapter::new(client))))
    }
}
