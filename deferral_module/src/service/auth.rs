use axum::http::{HeaderMap, StatusCode};
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use super::state::SupabaseAuth;

/// Response from Supabase /auth/v1/user endpoint
#[derive(Debug, Deserialize)]
struct SupabaseUser {
    id: Uuid,
}

/// Resolves the caller's user id from the Authorization header.
pub(super) async fn authenticate(
    auth: &SupabaseAuth,
    headers: &HeaderMap,
) -> Result<Uuid, (StatusCode, String)> {
    let token = extract_bearer_token(headers).ok_or_else(|| {
        (
            StatusCode::UNAUTHORIZED,
            "Missing Authorization header".to_string(),
        )
    })?;
    validate_supabase_token(auth, &token).await
}

/// Validate a Supabase access token, returns the auth user ID
async fn validate_supabase_token(
    auth: &SupabaseAuth,
    token: &str,
) -> Result<Uuid, (StatusCode, String)> {
    let Some(project_url) = auth.project_url.as_deref() else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "Auth not configured (missing SUPABASE_PROJECT_URL)".to_string(),
        ));
    };

    let resp = auth
        .http
        .get(format!("{}/auth/v1/user", project_url))
        .header("Authorization", format!("Bearer {}", token))
        .header("apikey", auth.anon_key.clone().unwrap_or_default())
        .send()
        .await
        .map_err(|e| {
            error!("Failed to validate token with Supabase: {}", e);
            (
                StatusCode::BAD_GATEWAY,
                "Failed to validate token".to_string(),
            )
        })?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        error!("Supabase auth validation failed: {} - {}", status, body);
        return Err((
            StatusCode::UNAUTHORIZED,
            "Invalid or expired token".to_string(),
        ));
    }

    let user: SupabaseUser = resp.json().await.map_err(|e| {
        error!("Failed to parse Supabase user response: {}", e);
        (
            StatusCode::BAD_GATEWAY,
            "Invalid response from auth service".to_string(),
        )
    })?;

    Ok(user.id)
}

/// Extract Bearer token from Authorization header
fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", HeaderValue::from_str(value).expect("header"));
        headers
    }

    #[test]
    fn bearer_token_extraction() {
        assert_eq!(
            extract_bearer_token(&headers_with("Bearer abc.def")).as_deref(),
            Some("abc.def")
        );
        assert_eq!(extract_bearer_token(&headers_with("Basic abc")), None);
        assert_eq!(extract_bearer_token(&headers_with("Bearer   ")), None);
        assert_eq!(extract_bearer_token(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn resolves_user_from_supabase() {
        let mut server = mockito::Server::new_async().await;
        let user_id = Uuid::new_v4();
        let mock = server
            .mock("GET", "/auth/v1/user")
            .match_header("authorization", "Bearer good-token")
            .match_header("apikey", "anon")
            .with_status(200)
            .with_body(format!(r#"{{"id":"{}","email":"a@example.com"}}"#, user_id))
            .create_async()
            .await;
        let auth = SupabaseAuth::new(Some(format!("{}/", server.url())), Some("anon".to_string()));

        let resolved = authenticate(&auth, &headers_with("Bearer good-token"))
            .await
            .expect("user");
        assert_eq!(resolved, user_id);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rejected_token_is_unauthorized() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/auth/v1/user")
            .with_status(401)
            .with_body(r#"{"msg":"invalid JWT"}"#)
            .create_async()
            .await;
        let auth = SupabaseAuth::new(Some(server.url()), None);

        let (status, _) = authenticate(&auth, &headers_with("Bearer expired"))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, message) = authenticate(&auth, &HeaderMap::new()).await.unwrap_err();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(message, "Missing Authorization header");
    }

    #[tokio::test]
    async fn unconfigured_auth_is_unavailable() {
        let auth = SupabaseAuth::new(None, None);
        let (status, _) = authenticate(&auth, &headers_with("Bearer token"))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
