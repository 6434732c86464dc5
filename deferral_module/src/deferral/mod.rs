mod core;
mod store;
mod types;
mod utils;

pub use self::core::Deferrals;
pub use store::{
    DeferralStore, MailAccountStore, PostgresDeferralStore, SqliteDeferralStore, StoreError,
};
pub use types::{
    DeferRequest, DeferralError, DeferralRecord, DueDeferral, MessageRecord, SweepReport,
    ThreadState, ThreadSummary,
};
