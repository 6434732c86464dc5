//! Mailbox adapters for remote mail providers.

pub mod graph;

pub use graph::{GraphMailboxAdapter, GraphMailboxProvider};
