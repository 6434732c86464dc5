pub mod adapters;
pub mod mailbox;
pub mod service;

mod deferral;

pub use deferral::{
    DeferRequest, DeferralError, DeferralRecord, DeferralStore, Deferrals, DueDeferral,
    MailAccountStore, MessageRecord, PostgresDeferralStore, SqliteDeferralStore, StoreError,
    SweepReport, ThreadState, ThreadSummary,
};
