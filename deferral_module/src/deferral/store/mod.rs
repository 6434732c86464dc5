use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::types::{DeferralRecord, DueDeferral, ThreadState};

mod pg;
mod schema;
mod sqlite;

pub use pg::PostgresDeferralStore;
pub use sqlite::SqliteDeferralStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("postgres error: {0}")]
    Postgres(#[from] postgres::Error),
    #[error("pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
    #[error("uuid parse error: {0}")]
    UuidParse(#[from] uuid::Error),
    #[error("missing SUPABASE_DB_URL/DATABASE_URL")]
    MissingDbUrl,
    #[error("store config error: {0}")]
    Config(String),
}

/// Persistence for deferrals and the thread flags they drive.
///
/// Every call is scoped by `user_id`. Implementations run each method as a
/// single statement (or a read); callers never get a transaction spanning
/// two calls.
pub trait DeferralStore: Send + Sync {
    fn find_thread(&self, user_id: Uuid, thread_id: Uuid)
        -> Result<Option<ThreadState>, StoreError>;

    /// Remote id of the newest message in the thread that has one.
    fn latest_remote_message_id(
        &self,
        user_id: Uuid,
        thread_id: Uuid,
    ) -> Result<Option<String>, StoreError>;

    fn insert_deferral(&self, record: &DeferralRecord) -> Result<(), StoreError>;

    fn hide_thread(
        &self,
        user_id: Uuid,
        thread_id: Uuid,
        processed_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Unprocessed deferrals with `defer_until <= now`, earliest first.
    fn due_deferrals(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeferralRecord>, StoreError>;

    /// Same selection as [`DeferralStore::due_deferrals`], joined with the
    /// thread preview.
    fn due_deferrals_with_threads(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<DueDeferral>, StoreError>;

    /// Clears `is_hidden` and `is_processed`. Returns the rows touched.
    fn restore_threads(&self, user_id: Uuid, thread_ids: &[Uuid]) -> Result<usize, StoreError>;

    fn mark_deferrals_processed(
        &self,
        user_id: Uuid,
        deferral_ids: &[Uuid],
    ) -> Result<usize, StoreError>;

    /// All deferrals for a thread, oldest first, processed or not.
    fn deferrals_for_thread(
        &self,
        user_id: Uuid,
        thread_id: Uuid,
    ) -> Result<Vec<DeferralRecord>, StoreError>;

    fn users_with_due_deferrals(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError>;
}

/// Lookup of per-user mailbox credentials.
pub trait MailAccountStore: Send + Sync {
    fn mail_access_token(&self, user_id: Uuid) -> Result<Option<String>, StoreError>;
}
