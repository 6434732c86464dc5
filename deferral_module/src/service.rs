mod auth;
mod config;
mod deferrals;
mod server;
mod state;
mod sweeper;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub use config::{ServiceConfig, StoreBackend, DEFAULT_BODY_MAX_BYTES};
pub use server::{build_router, run_server};
pub use state::{AppState, SupabaseAuth};
pub use sweeper::{start_sweeper, SweeperControl};
