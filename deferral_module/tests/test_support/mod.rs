#![allow(dead_code)]

pub fn require_supabase_db_url(test_name: &str) -> Option<String> {
    dotenvy::dotenv().ok();
    match std::env::var("SUPABASE_DB_URL") {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => {
            eprintln!("Skipping {test_name}; SUPABASE_DB_URL not set.");
            None
        }
    }
}

pub async fn start_mockito_server(test_name: &str) -> Option<mockito::ServerGuard> {
    match tokio::time::timeout(
        std::time::Duration::from_secs(5),
        mockito::Server::new_async(),
    )
    .await
    {
        Ok(server) => Some(server),
        Err(_) => {
            eprintln!(
                "Skipping {test_name}; unable to start mockito server in this environment."
            );
            None
        }
    }
}
