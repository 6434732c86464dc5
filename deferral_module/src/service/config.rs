use std::env;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use graph_mail_module::{DEFAULT_GRAPH_BASE_URL, DEFAULT_GRAPH_TIMEOUT};

use super::BoxError;

pub const DEFAULT_BODY_MAX_BYTES: usize = 64 * 1024;

/// Where deferral and thread rows live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    Postgres,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "sqlite" => Ok(Self::Sqlite),
            "postgres" | "postgresql" | "supabase" => Ok(Self::Postgres),
            other => Err(format!("unknown deferral store backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub store_backend: StoreBackend,
    /// SQLite database file, used by the sqlite backend
    pub db_path: PathBuf,
    /// Postgres connection string, required by the postgres backend
    pub db_url: Option<String>,
    pub db_allow_invalid_certs: bool,
    pub db_ensure_schema: bool,
    /// Supabase project used to resolve bearer tokens to user ids
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,
    pub sweep_enabled: bool,
    pub sweep_interval: Duration,
    pub graph_base_url: String,
    /// Shared Graph token for users without a stored mail account
    pub graph_access_token: Option<String>,
    pub graph_timeout: Duration,
    pub body_max_bytes: usize,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, BoxError> {
        dotenvy::dotenv().ok();

        let host = env::var("RUST_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("RUST_SERVICE_PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(9001);

        let store_backend = env::var("DEFERRAL_STORE_BACKEND")
            .unwrap_or_default()
            .parse::<StoreBackend>()?;
        let db_path = match env_var_non_empty("DEFERRAL_DB_PATH") {
            Some(raw) => resolve_path(raw)?,
            None => default_runtime_root()?.join("state").join("deferrals.db"),
        };
        let db_url =
            env_var_non_empty("SUPABASE_DB_URL").or_else(|| env_var_non_empty("DATABASE_URL"));
        if store_backend == StoreBackend::Postgres && db_url.is_none() {
            return Err("SUPABASE_DB_URL must be set for the postgres deferral store".into());
        }
        let db_allow_invalid_certs = env_flag("DEFERRAL_DB_TLS_ALLOW_INVALID_CERTS", false);
        let db_ensure_schema = env_flag("DEFERRAL_DB_ENSURE_SCHEMA", false);

        let supabase_url = env_var_non_empty("SUPABASE_PROJECT_URL")
            .map(|value| value.trim_end_matches('/').to_string());
        let supabase_anon_key = env_var_non_empty("SUPABASE_ANON_KEY");

        let sweep_enabled = env_flag("DEFERRAL_SWEEP_ENABLED", true);
        let sweep_interval = env::var("DEFERRAL_SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(60));

        let graph_base_url = env_var_non_empty("GRAPH_API_BASE_URL")
            .unwrap_or_else(|| DEFAULT_GRAPH_BASE_URL.to_string());
        let graph_access_token = env_var_non_empty("GRAPH_ACCESS_TOKEN");
        let graph_timeout = env::var("GRAPH_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_GRAPH_TIMEOUT);

        let body_max_bytes = env::var("DEFERRAL_BODY_MAX_BYTES")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_BODY_MAX_BYTES);

        Ok(Self {
            host,
            port,
            store_backend,
            db_path,
            db_url,
            db_allow_invalid_certs,
            db_ensure_schema,
            supabase_url,
            supabase_anon_key,
            sweep_enabled,
            sweep_interval,
            graph_base_url,
            graph_access_token,
            graph_timeout,
            body_max_bytes,
        })
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "y"
        ),
        Err(_) => default,
    }
}

fn env_var_non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn default_runtime_root() -> Result<PathBuf, io::Error> {
    let home = dirs::home_dir()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "HOME not set"))?;
    Ok(home.join(".deferral_service"))
}

fn resolve_path(raw: String) -> Result<PathBuf, io::Error> {
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        Ok(path)
    } else {
        let cwd = env::current_dir()?;
        Ok(cwd.join(path))
    }
}
