use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::mailbox::MailboxProvider;

use super::store::DeferralStore;
use super::types::{DeferralError, DeferralRecord, DueDeferral, SweepReport};
use super::utils::{ceil_micros, distinct_ids, truncate_micros};

/// Defers threads out of the inbox and brings them back once due.
#[derive(Clone)]
pub struct Deferrals {
    store: Arc<dyn DeferralStore>,
    mailbox: Arc<dyn MailboxProvider>,
}

impl Deferrals {
    pub fn new(store: Arc<dyn DeferralStore>, mailbox: Arc<dyn MailboxProvider>) -> Self {
        Self { store, mailbox }
    }

    pub fn defer(
        &self,
        user_id: Uuid,
        thread_id: Uuid,
        defer_until: DateTime<Utc>,
    ) -> Result<DeferralRecord, DeferralError> {
        self.defer_at(user_id, thread_id, defer_until, Utc::now())
    }

    /// Hides `thread_id` until `defer_until`, stamping writes with `now`.
    ///
    /// A `defer_until` in the past is accepted; the next sweep restores the
    /// thread. The record insert and the thread update are separate writes.
    /// Timestamps are kept at microsecond precision, `defer_until` rounded up.
    pub fn defer_at(
        &self,
        user_id: Uuid,
        thread_id: Uuid,
        defer_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<DeferralRecord, DeferralError> {
        if user_id.is_nil() {
            return Err(DeferralError::Validation("user_id is required".to_string()));
        }
        if thread_id.is_nil() {
            return Err(DeferralError::Validation("thread_id is required".to_string()));
        }
        let defer_until = ceil_micros(defer_until);
        let now = truncate_micros(now);

        if self.store.find_thread(user_id, thread_id)?.is_none() {
            return Err(DeferralError::NotFound(thread_id));
        }

        match self.store.latest_remote_message_id(user_id, thread_id)? {
            Some(remote_message_id) => {
                self.mirror_snooze(user_id, &remote_message_id, defer_until)
            }
            None => debug!(
                "thread {} has no remote message id; skipping mailbox snooze",
                thread_id
            ),
        }

        let record = DeferralRecord::new(user_id, thread_id, defer_until, now);
        self.store.insert_deferral(&record)?;
        self.store.hide_thread(user_id, thread_id, now)?;
        info!(
            "deferred thread {} for user {} until {}",
            thread_id,
            user_id,
            defer_until.to_rfc3339()
        );
        Ok(record)
    }

    /// Restores every thread whose deferral is due at `now` and marks those
    /// deferrals processed. Returns them earliest-due first.
    ///
    /// Threads are restored before deferrals are marked. If marking fails the
    /// deferrals stay due and the next call repeats the same writes.
    pub fn reconcile_due(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeferralRecord>, DeferralError> {
        let now = truncate_micros(now);
        let due = self.store.due_deferrals(user_id, now)?;
        if due.is_empty() {
            return Ok(Vec::new());
        }

        let thread_ids = distinct_ids(due.iter().map(|record| record.thread_id));
        let restored = self.store.restore_threads(user_id, &thread_ids)?;

        let deferral_ids = due.iter().map(|record| record.id).collect::<Vec<_>>();
        let marked = self.store.mark_deferrals_processed(user_id, &deferral_ids)?;

        info!(
            "reconciled {} deferral(s) for user {} ({} thread(s) restored, {} marked)",
            due.len(),
            user_id,
            restored,
            marked
        );
        Ok(due
            .into_iter()
            .map(|mut record| {
                record.processed = true;
                record
            })
            .collect())
    }

    /// Due deferrals with their thread preview. Read only.
    pub fn due_deferrals(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<DueDeferral>, DeferralError> {
        Ok(self
            .store
            .due_deferrals_with_threads(user_id, truncate_micros(now))?)
    }

    pub fn thread_deferrals(
        &self,
        user_id: Uuid,
        thread_id: Uuid,
    ) -> Result<Vec<DeferralRecord>, DeferralError> {
        if self.store.find_thread(user_id, thread_id)?.is_none() {
            return Err(DeferralError::NotFound(thread_id));
        }
        Ok(self.store.deferrals_for_thread(user_id, thread_id)?)
    }

    /// Reconciles every user that has due deferrals at `now`.
    ///
    /// A user whose reconcile fails is logged and reported; the sweep moves
    /// on to the next user.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, DeferralError> {
        let now = truncate_micros(now);
        let users = self.store.users_with_due_deferrals(now)?;
        let mut report = SweepReport {
            users: users.len(),
            ..SweepReport::default()
        };
        for user_id in users {
            match self.reconcile_due(user_id, now) {
                Ok(processed) => report.processed += processed.len(),
                Err(err) => {
                    error!("deferral sweep failed for user {}: {}", user_id, err);
                    report.failed_users.push(user_id);
                }
            }
        }
        Ok(report)
    }

    fn mirror_snooze(&self, user_id: Uuid, remote_message_id: &str, defer_until: DateTime<Utc>) {
        let adapter = match self.mailbox.adapter_for(user_id) {
            Ok(Some(adapter)) => adapter,
            Ok(None) => {
                debug!(
                    "no mailbox configured for user {}; tracking deferral locally",
                    user_id
                );
                return;
            }
            Err(err) => {
                warn!("mailbox lookup failed for user {}: {}", user_id, err);
                return;
            }
        };

        match adapter.snooze(remote_message_id, defer_until) {
            Ok(result) if result.success => {
                debug!("snoozed remote message {} for user {}", remote_message_id, user_id);
            }
            Ok(result) => warn!(
                "mailbox snooze failed for message {}: {}",
                remote_message_id,
                result.error.as_deref().unwrap_or("unknown error")
            ),
            Err(err) => warn!(
                "mailbox snooze failed for message {}: {}",
                remote_message_id, err
            ),
        }
    }
}
