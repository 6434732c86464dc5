use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use tokio::task;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::adapters::GraphMailboxProvider;
use crate::deferral::{
    DeferralStore, Deferrals, MailAccountStore, PostgresDeferralStore, SqliteDeferralStore,
    StoreError,
};

use super::config::{ServiceConfig, StoreBackend};
use super::deferrals::{defer_thread, due, reconcile, thread_history};
use super::state::{AppState, SupabaseAuth};
use super::sweeper::start_sweeper;
use super::BoxError;

pub async fn run_server(
    config: ServiceConfig,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), BoxError> {
    let (store, accounts) = build_stores(&config).await?;
    let mailbox = GraphMailboxProvider::new(accounts)
        .with_base_url(config.graph_base_url.clone())
        .with_timeout(config.graph_timeout)
        .with_fallback_token(config.graph_access_token.clone());
    let deferrals = Deferrals::new(store, Arc::new(mailbox));

    let mut sweeper_control = if config.sweep_enabled {
        info!(
            "deferral sweeper running every {}s",
            config.sweep_interval.as_secs()
        );
        Some(start_sweeper(deferrals.clone(), config.sweep_interval))
    } else {
        info!("deferral sweeper disabled; threads return only on explicit reconcile");
        None
    };

    let state = AppState {
        deferrals,
        auth: SupabaseAuth::new(config.supabase_url.clone(), config.supabase_anon_key.clone()),
    };

    let host: IpAddr = config
        .host
        .parse()
        .map_err(|_| format!("invalid host: {}", config.host))?;
    let addr = SocketAddr::new(host, config.port);
    info!("deferral service listening on {}", addr);

    let app = build_router(state).layer(DefaultBodyLimit::max(config.body_max_bytes));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await;
    if let Some(control) = sweeper_control.as_mut() {
        control.stop_and_join();
    }
    serve_result?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/api/threads/:thread_id/defer", post(defer_thread))
        .route("/api/threads/:thread_id/deferrals", get(thread_history))
        .route("/api/deferrals/reconcile", post(reconcile))
        .route("/api/deferrals/due", get(due))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

async fn build_stores(
    config: &ServiceConfig,
) -> Result<(Arc<dyn DeferralStore>, Arc<dyn MailAccountStore>), BoxError> {
    match config.store_backend {
        StoreBackend::Sqlite => {
            let path = config.db_path.clone();
            info!("deferral store: sqlite at {}", path.display());
            let store = Arc::new(
                task::spawn_blocking(move || SqliteDeferralStore::new(path))
                    .await
                    .map_err(|err| -> BoxError { err.into() })??,
            );
            let deferral_store: Arc<dyn DeferralStore> = store.clone();
            let accounts: Arc<dyn MailAccountStore> = store;
            Ok((deferral_store, accounts))
        }
        StoreBackend::Postgres => {
            let db_url = config
                .db_url
                .clone()
                .ok_or("SUPABASE_DB_URL must be set for the postgres deferral store")?;
            let allow_invalid_certs = config.db_allow_invalid_certs;
            let ensure_schema = config.db_ensure_schema;
            info!("deferral store: postgres");
            let store = Arc::new(
                task::spawn_blocking(move || {
                    let store = PostgresDeferralStore::new(&db_url, allow_invalid_certs)?;
                    if ensure_schema {
                        store.ensure_schema()?;
                    }
                    Ok::<_, StoreError>(store)
                })
                .await
                .map_err(|err| -> BoxError { err.into() })??,
            );
            let deferral_store: Arc<dyn DeferralStore> = store.clone();
            let accounts: Arc<dyn MailAccountStore> = store;
            Ok((deferral_store, accounts))
        }
    }
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
