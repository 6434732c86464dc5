use crate::deferral::Deferrals;

/// Shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub deferrals: Deferrals,
    pub auth: SupabaseAuth,
}

/// Where bearer tokens are sent to be resolved to a user id.
#[derive(Clone)]
pub struct SupabaseAuth {
    pub(super) project_url: Option<String>,
    pub(super) anon_key: Option<String>,
    pub(super) http: reqwest::Client,
}

impl SupabaseAuth {
    pub fn new(project_url: Option<String>, anon_key: Option<String>) -> Self {
        Self {
            project_url: project_url.map(|value| value.trim_end_matches('/').to_string()),
            anon_key,
            http: reqwest::Client::new(),
        }
    }
}
