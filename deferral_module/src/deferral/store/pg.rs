use chrono::{DateTime, Utc};
use postgres_native_tls::MakeTlsConnector;
use r2d2::{Pool, PooledConnection};
use r2d2_postgres::PostgresConnectionManager;
use std::env;
use std::time::Duration;
use tracing::error;
use uuid::Uuid;

use super::super::types::{DeferralRecord, DueDeferral, ThreadState, ThreadSummary};
use super::schema::POSTGRES_SCHEMA;
use super::{DeferralStore, MailAccountStore, StoreError};

const DEFERRAL_COLUMNS: &str =
    "d.id, d.user_id, d.thread_id, d.defer_until, d.processed, d.created_at";

/// Logs connection failures the pool would otherwise swallow.
#[derive(Debug)]
struct LoggingErrorHandler;

impl r2d2::HandleError<postgres::Error> for LoggingErrorHandler {
    fn handle_error(&self, err: postgres::Error) {
        error!("deferral store postgres pool error: {:?}", err);
    }
}

/// Supabase-backed store.
#[derive(Clone)]
pub struct PostgresDeferralStore {
    pool: Option<Pool<PostgresConnectionManager<MakeTlsConnector>>>,
}

impl PostgresDeferralStore {
    pub fn from_env() -> Result<Self, StoreError> {
        let db_url = resolve_db_url()?;
        Self::new(&db_url, resolve_bool_env("DEFERRAL_DB_TLS_ALLOW_INVALID_CERTS"))
    }

    pub fn new(db_url: &str, allow_invalid_certs: bool) -> Result<Self, StoreError> {
        let config: postgres::Config = db_url.parse()?;

        let mut tls_builder = native_tls::TlsConnector::builder();
        if allow_invalid_certs {
            tls_builder.danger_accept_invalid_certs(true);
            tls_builder.danger_accept_invalid_hostnames(true);
        }
        let tls_connector = tls_builder
            .build()
            .map_err(|err| StoreError::Config(err.to_string()))?;
        let tls = MakeTlsConnector::new(tls_connector);

        let manager = PostgresConnectionManager::new(config, tls);
        let pool = Pool::builder()
            .max_size(10)
            .min_idle(Some(1))
            .connection_timeout(Duration::from_secs(5))
            .idle_timeout(Some(Duration::from_secs(300)))
            .error_handler(Box::new(LoggingErrorHandler))
            .build(manager)?;

        Ok(Self { pool: Some(pool) })
    }

    /// Creates the tables this store reads when they do not exist yet.
    ///
    /// Production tables belong to the product schema; this is for local
    /// databases and tests.
    pub fn ensure_schema(&self) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        conn.batch_execute(POSTGRES_SCHEMA)?;
        Ok(())
    }

    /// Insert or replace a thread row, as mail ingestion does.
    pub fn upsert_thread(&self, thread: &ThreadState) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        conn.execute(
            "INSERT INTO email_threads (id, user_id, subject, last_message_at, participants, is_hidden, is_processed, processed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (id) DO UPDATE SET
                user_id = EXCLUDED.user_id,
                subject = EXCLUDED.subject,
                last_message_at = EXCLUDED.last_message_at,
                participants = EXCLUDED.participants,
                is_hidden = EXCLUDED.is_hidden,
                is_processed = EXCLUDED.is_processed,
                processed_at = EXCLUDED.processed_at",
            &[
                &thread.id,
                &thread.user_id,
                &thread.subject,
                &thread.last_message_at,
                &thread.participants,
                &thread.is_hidden,
                &thread.is_processed,
                &thread.processed_at,
            ],
        )?;
        Ok(())
    }

    fn conn(
        &self,
    ) -> Result<PooledConnection<PostgresConnectionManager<MakeTlsConnector>>, StoreError> {
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| StoreError::Config("deferral store pool dropped".to_string()))?;
        Ok(pool.get()?)
    }
}

impl DeferralStore for PostgresDeferralStore {
    fn find_thread(
        &self,
        user_id: Uuid,
        thread_id: Uuid,
    ) -> Result<Option<ThreadState>, StoreError> {
        let mut conn = self.conn()?;
        let row = conn.query_opt(
            "SELECT id, user_id, subject, last_message_at, participants, is_hidden, is_processed, processed_at
             FROM email_threads
             WHERE id = $1 AND user_id = $2",
            &[&thread_id, &user_id],
        )?;
        Ok(row.map(|r| ThreadState {
            id: r.get(0),
            user_id: r.get(1),
            subject: r.get(2),
            last_message_at: r.get(3),
            participants: r.get(4),
            is_hidden: r.get(5),
            is_processed: r.get(6),
            processed_at: r.get(7),
        }))
    }

    fn latest_remote_message_id(
        &self,
        user_id: Uuid,
        thread_id: Uuid,
    ) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn()?;
        let row = conn.query_opt(
            "SELECT remote_message_id
             FROM emails
             WHERE user_id = $1
               AND thread_id = $2
               AND remote_message_id IS NOT NULL
               AND remote_message_id <> ''
             ORDER BY received_at DESC
             LIMIT 1",
            &[&user_id, &thread_id],
        )?;
        Ok(row.map(|r| r.get(0)))
    }

    fn insert_deferral(&self, record: &DeferralRecord) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        conn.execute(
            "INSERT INTO deferred_emails (id, user_id, thread_id, defer_until, processed, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
            &[
                &record.id,
                &record.user_id,
                &record.thread_id,
                &record.defer_until,
                &record.processed,
                &record.created_at,
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
        let mut conn = self.conn()?;
        conn.execute(
            "UPDATE email_threads
             SET is_hidden = true,
                 is_processed = true,
                 processed_at = $1
             WHERE id = $2 AND user_id = $3",
            &[&processed_at, &thread_id, &user_id],
        )?;
        Ok(())
    }

    fn due_deferrals(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeferralRecord>, StoreError> {
        let mut conn = self.conn()?;
        let rows = conn.query(
            &format!(
                "SELECT {columns}
                 FROM deferred_emails d
                 WHERE d.user_id = $1 AND d.processed = false AND d.defer_until <= $2
                 ORDER BY d.defer_until ASC, d.created_at ASC",
                columns = DEFERRAL_COLUMNS
            ),
            &[&user_id, &now],
        )?;
        Ok(rows.iter().map(deferral_from_row).collect())
    }

    fn due_deferrals_with_threads(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<DueDeferral>, StoreError> {
        let mut conn = self.conn()?;
        let rows = conn.query(
            &format!(
                "SELECT {columns}, t.id, t.subject, t.last_message_at, t.participants
                 FROM deferred_emails d
                 LEFT JOIN email_threads t
                   ON t.id = d.thread_id AND t.user_id = d.user_id
                 WHERE d.user_id = $1 AND d.processed = false AND d.defer_until <= $2
                 ORDER BY d.defer_until ASC, d.created_at ASC",
                columns = DEFERRAL_COLUMNS
            ),
            &[&user_id, &now],
        )?;
        Ok(rows
            .iter()
            .map(|r| {
                let deferral = deferral_from_row(r);
                let joined: Option<Uuid> = r.get(6);
                let thread = match joined {
                    Some(id) => ThreadSummary {
                        id,
                        subject: r.get(7),
                        last_message_at: r.get(8),
                        participants: r.get(9),
                    },
                    None => ThreadSummary::missing(deferral.thread_id),
                };
                DueDeferral { deferral, thread }
            })
            .collect())
    }

    fn restore_threads(&self, user_id: Uuid, thread_ids: &[Uuid]) -> Result<usize, StoreError> {
        if thread_ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn()?;
        let thread_ids = thread_ids.to_vec();
        let updated = conn.execute(
            "UPDATE email_threads
             SET is_hidden = false,
                 is_processed = false
             WHERE user_id = $1 AND id = ANY($2)",
            &[&user_id, &thread_ids],
        )?;
        Ok(updated as usize)
    }

    fn mark_deferrals_processed(
        &self,
        user_id: Uuid,
        deferral_ids: &[Uuid],
    ) -> Result<usize, StoreError> {
        if deferral_ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn()?;
        let deferral_ids = deferral_ids.to_vec();
        let updated = conn.execute(
            "UPDATE deferred_emails
             SET processed = true
             WHERE user_id = $1 AND id = ANY($2)",
            &[&user_id, &deferral_ids],
        )?;
        Ok(updated as usize)
    }

    fn deferrals_for_thread(
        &self,
        user_id: Uuid,
        thread_id: Uuid,
    ) -> Result<Vec<DeferralRecord>, StoreError> {
        let mut conn = self.conn()?;
        let rows = conn.query(
            &format!(
                "SELECT {columns}
                 FROM deferred_emails d
                 WHERE d.user_id = $1 AND d.thread_id = $2
                 ORDER BY d.created_at ASC",
                columns = DEFERRAL_COLUMNS
            ),
            &[&user_id, &thread_id],
        )?;
        Ok(rows.iter().map(deferral_from_row).collect())
    }

    fn users_with_due_deferrals(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError> {
        let mut conn = self.conn()?;
        let rows = conn.query(
            "SELECT user_id
             FROM deferred_emails
             WHERE processed = false AND defer_until <= $1
             GROUP BY user_id
             ORDER BY MIN(defer_until) ASC",
            &[&now],
        )?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }
}

impl MailAccountStore for PostgresDeferralStore {
    fn mail_access_token(&self, user_id: Uuid) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn()?;
        let row = conn.query_opt(
            "SELECT access_token FROM mail_accounts WHERE user_id = $1",
            &[&user_id],
        )?;
        Ok(row
            .map(|r| r.get::<_, String>(0))
            .filter(|value| !value.trim().is_empty()))
    }
}

impl Drop for PostgresDeferralStore {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            std::thread::spawn(move || drop(pool));
        }
    }
}

fn deferral_from_row(r: &postgres::Row) -> DeferralRecord {
    DeferralRecord {
        id: r.get(0),
        user_id: r.get(1),
        thread_id: r.get(2),
        defer_until: r.get(3),
        processed: r.get(4),
        created_at: r.get(5),
    }
}

fn resolve_db_url() -> Result<String, StoreError> {
    env::var("SUPABASE_DB_URL")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .or_else(|| {
            env::var("DATABASE_URL")
                .ok()
                .filter(|value| !value.trim().is_empty())
        })
        .ok_or(StoreError::MissingDbUrl)
}

fn resolve_bool_env(key: &str) -> bool {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_ascii_lowercase())
        .map(|value| matches!(value.as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}
