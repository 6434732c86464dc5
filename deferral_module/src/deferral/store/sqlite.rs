use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use super::super::types::{
    DeferralRecord, DueDeferral, MessageRecord, ThreadState, ThreadSummary,
};
use super::super::utils::{
    bool_to_int, format_datetime, join_participants, numbered_placeholders, parse_datetime,
    parse_optional_datetime, split_participants,
};
use super::schema::SQLITE_SCHEMA;
use super::{DeferralStore, MailAccountStore, StoreError};

type DeferralColumns = (String, String, String, String, i64, String);

const DEFERRAL_COLUMNS: &str = "d.id, d.user_id, d.thread_id, d.defer_until, d.processed, d.created_at";

/// File-backed store, opened per call like the other SQLite stores.
#[derive(Debug, Clone)]
pub struct SqliteDeferralStore {
    path: PathBuf,
}

impl SqliteDeferralStore {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self { path: path.into() };
        let _ = store.open()?;
        Ok(store)
    }

    /// Insert or replace a thread row, as mail ingestion does.
    pub fn upsert_thread(&self, thread: &ThreadState) -> Result<(), StoreError> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO email_threads (id, user_id, subject, last_message_at, participants, is_hidden, is_processed, processed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                subject = excluded.subject,
                last_message_at = excluded.last_message_at,
                participants = excluded.participants,
                is_hidden = excluded.is_hidden,
                is_processed = excluded.is_processed,
                processed_at = excluded.processed_at",
            params![
                thread.id.to_string(),
                thread.user_id.to_string(),
                thread.subject.as_deref(),
                thread.last_message_at.map(format_datetime),
                join_participants(&thread.participants),
                bool_to_int(thread.is_hidden),
                bool_to_int(thread.is_processed),
                thread.processed_at.map(format_datetime),
            ],
        )?;
        Ok(())
    }

    pub fn insert_message(&self, message: &MessageRecord) -> Result<(), StoreError> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO emails (id, user_id, thread_id, remote_message_id, received_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                message.id.to_string(),
                message.user_id.to_string(),
                message.thread_id.to_string(),
                message.remote_message_id.as_deref(),
                format_datetime(message.received_at),
            ],
        )?;
        Ok(())
    }

    pub fn upsert_mail_account(&self, user_id: Uuid, access_token: &str) -> Result<(), StoreError> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO mail_accounts (user_id, access_token, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
                access_token = excluded.access_token,
                updated_at = excluded.updated_at",
            params![user_id.to_string(), access_token, format_datetime(Utc::now())],
        )?;
        Ok(())
    }

    fn open(&self) -> Result<Connection, StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SQLITE_SCHEMA)?;
        Ok(conn)
    }
}

impl DeferralStore for SqliteDeferralStore {
    fn find_thread(
        &self,
        user_id: Uuid,
        thread_id: Uuid,
    ) -> Result<Option<ThreadState>, StoreError> {
        let conn = self.open()?;
        let row = conn
            .query_row(
                "SELECT id, user_id, subject, last_message_at, participants, is_hidden, is_processed, processed_at
                 FROM email_threads
                 WHERE id = ?1 AND user_id = ?2",
                params![thread_id.to_string(), user_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, Option<String>>(7)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, owner, subject, last_message_at, participants, hidden, processed, processed_at)) =
            row
        else {
            return Ok(None);
        };
        Ok(Some(ThreadState {
            id: Uuid::parse_str(&id)?,
            user_id: Uuid::parse_str(&owner)?,
            subject,
            last_message_at: parse_optional_datetime(last_message_at.as_deref())?,
            participants: split_participants(&participants),
            is_hidden: hidden != 0,
            is_processed: processed != 0,
            processed_at: parse_optional_datetime(processed_at.as_deref())?,
        }))
    }

    fn latest_remote_message_id(
        &self,
        user_id: Uuid,
        thread_id: Uuid,
    ) -> Result<Option<String>, StoreError> {
        let conn = self.open()?;
        let remote_id = conn
            .query_row(
                "SELECT remote_message_id
                 FROM emails
                 WHERE user_id = ?1
                   AND thread_id = ?2
                   AND remote_message_id IS NOT NULL
                   AND remote_message_id != ''
                 ORDER BY received_at DESC
                 LIMIT 1",
                params![user_id.to_string(), thread_id.to_string()],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(remote_id)
    }

    fn insert_deferral(&self, record: &DeferralRecord) -> Result<(), StoreError> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO deferred_emails (id, user_id, thread_id, defer_until, processed, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.id.to_string(),
                record.user_id.to_string(),
                record.thread_id.to_string(),
                format_datetime(record.defer_until),
                bool_to_int(record.processed),
                format_datetime(record.created_at),
            ],
        )?;
        Ok(())
    }

    fn hide_thread(
        &self,
        user_id: Uuid,
        thread_id: Uuid,
        processed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE email_threads
             SET is_hidden = 1,
                 is_processed = 1,
                 processed_at = ?1
             WHERE id = ?2 AND user_id = ?3",
            params![
                format_datetime(processed_at),
                thread_id.to_string(),
                user_id.to_string()
            ],
        )?;
        Ok(())
    }

    fn due_deferrals(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeferralRecord>, StoreError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {columns}
             FROM deferred_emails d
             WHERE d.user_id = ?1 AND d.processed = 0 AND d.defer_until <= ?2
             ORDER BY d.defer_until ASC, d.created_at ASC",
            columns = DEFERRAL_COLUMNS
        ))?;
        let rows = stmt.query_map(
            params![user_id.to_string(), format_datetime(now)],
            read_deferral_columns,
        )?;
        let mut records = Vec::new();
        for row in rows {
            records.push(deferral_from_columns(row?)?);
        }
        Ok(records)
    }

    fn due_deferrals_with_threads(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<DueDeferral>, StoreError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {columns}, t.subject, t.last_message_at, t.participants
             FROM deferred_emails d
             LEFT JOIN email_threads t
               ON t.id = d.thread_id AND t.user_id = d.user_id
             WHERE d.user_id = ?1 AND d.processed = 0 AND d.defer_until <= ?2
             ORDER BY d.defer_until ASC, d.created_at ASC",
            columns = DEFERRAL_COLUMNS
        ))?;
        let rows = stmt.query_map(params![user_id.to_string(), format_datetime(now)], |row| {
            Ok((
                read_deferral_columns(row)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, Option<String>>(8)?,
            ))
        })?;

        let mut due = Vec::new();
        for row in rows {
            let (columns, subject, last_message_at, participants) = row?;
            let deferral = deferral_from_columns(columns)?;
            let thread = match participants {
                Some(participants) => ThreadSummary {
                    id: deferral.thread_id,
                    subject,
                    last_message_at: parse_optional_datetime(last_message_at.as_deref())?,
                    participants: split_participants(&participants),
                },
                None => ThreadSummary::missing(deferral.thread_id),
            };
            due.push(DueDeferral { deferral, thread });
        }
        Ok(due)
    }

    fn restore_threads(&self, user_id: Uuid, thread_ids: &[Uuid]) -> Result<usize, StoreError> {
        if thread_ids.is_empty() {
            return Ok(0);
        }
        let conn = self.open()?;
        let sql = format!(
            "UPDATE email_threads
             SET is_hidden = 0,
                 is_processed = 0
             WHERE user_id = ?1 AND id IN ({})",
            numbered_placeholders(2, thread_ids.len())
        );
        let values = std::iter::once(user_id.to_string())
            .chain(thread_ids.iter().map(Uuid::to_string))
            .collect::<Vec<_>>();
        Ok(conn.execute(&sql, params_from_iter(values))?)
    }

    fn mark_deferrals_processed(
        &self,
        user_id: Uuid,
        deferral_ids: &[Uuid],
    ) -> Result<usize, StoreError> {
        if deferral_ids.is_empty() {
            return Ok(0);
        }
        let conn = self.open()?;
        let sql = format!(
            "UPDATE deferred_emails
             SET processed = 1
             WHERE user_id = ?1 AND id IN ({})",
            numbered_placeholders(2, deferral_ids.len())
        );
        let values = std::iter::once(user_id.to_string())
            .chain(deferral_ids.iter().map(Uuid::to_string))
            .collect::<Vec<_>>();
        Ok(conn.execute(&sql, params_from_iter(values))?)
    }

    fn deferrals_for_thread(
        &self,
        user_id: Uuid,
        thread_id: Uuid,
    ) -> Result<Vec<DeferralRecord>, StoreError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {columns}
             FROM deferred_emails d
             WHERE d.user_id = ?1 AND d.thread_id = ?2
             ORDER BY d.created_at ASC",
            columns = DEFERRAL_COLUMNS
        ))?;
        let rows = stmt.query_map(
            params![user_id.to_string(), thread_id.to_string()],
            read_deferral_columns,
        )?;
        let mut records = Vec::new();
        for row in rows {
            records.push(deferral_from_columns(row?)?);
        }
        Ok(records)
    }

    fn users_with_due_deferrals(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT user_id, MIN(defer_until) AS first_due
             FROM deferred_emails
             WHERE processed = 0 AND defer_until <= ?1
             GROUP BY user_id
             ORDER BY first_due ASC",
        )?;
        let rows = stmt.query_map(params![format_datetime(now)], |row| row.get::<_, String>(0))?;
        let mut users = Vec::new();
        for row in rows {
            users.push(Uuid::parse_str(&row?)?);
        }
        Ok(users)
    }
}

impl MailAccountStore for SqliteDeferralStore {
    fn mail_access_token(&self, user_id: Uuid) -> Result<Option<String>, StoreError> {
        let conn = self.open()?;
        let token = conn
            .query_row(
                "SELECT access_token FROM mail_accounts WHERE user_id = ?1",
                params![user_id.to_string()],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(token.filter(|value| !value.trim().is_empty()))
    }
}

fn read_deferral_columns(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeferralColumns> {
    Ok((
        row.get::<_, String>(0)?,
        row.get::<_, String>(1)?,
        row.get::<_, String>(2)?,
        row.get::<_, String>(3)?,
        row.get::<_, i64>(4)?,
        row.get::<_, String>(5)?,
    ))
}

fn deferral_from_columns(columns: DeferralColumns) -> Result<DeferralRecord, StoreError> {
    let (id, user_id, thread_id, defer_until, processed, created_at) = columns;
    Ok(DeferralRecord {
        id: Uuid::parse_str(&id)?,
        user_id: Uuid::parse_str(&user_id)?,
        thread_id: Uuid::parse_str(&thread_id)?,
        defer_until: parse_datetime(&defer_until)?,
        processed: processed != 0,
        created_at: parse_datetime(&created_at)?,
    })
}
