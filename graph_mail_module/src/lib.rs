//! Blocking Microsoft Graph mail client.
//!
//! Only the calls the deferral service mirrors into a remote mailbox are
//! implemented: snoozing a message is expressed as a follow-up flag whose due
//! date is the deferral time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";
pub const DEFAULT_GRAPH_TIMEOUT: Duration = Duration::from_secs(10);

const GRAPH_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("graph api error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("missing access token")]
    MissingAccessToken,
    #[error("empty message id")]
    EmptyMessageId,
}

#[derive(Debug, Clone)]
pub struct GraphClient {
    base_url: String,
    access_token: String,
    http: reqwest::blocking::Client,
}

impl GraphClient {
    pub fn new(access_token: &str) -> Result<Self, GraphError> {
        Self::with_base_url(access_token, DEFAULT_GRAPH_BASE_URL, DEFAULT_GRAPH_TIMEOUT)
    }

    pub fn with_base_url(
        access_token: &str,
        base_url: &str,
        timeout: Duration,
    ) -> Result<Self, GraphError> {
        let access_token = access_token.trim();
        if access_token.is_empty() {
            return Err(GraphError::MissingAccessToken);
        }
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
            http,
        })
    }

    /// Flag a message for follow-up at `until`.
    ///
    /// The flag window starts at the earlier of now and `until`, since Graph
    /// rejects a due date that precedes the start date.
    pub fn snooze_message(&self, message_id: &str, until: DateTime<Utc>) -> Result<(), GraphError> {
        let start = Utc::now().min(until);
        let body = FlagUpdate {
            flag: FollowupFlag {
                flag_status: "flagged".to_string(),
                start_date_time: Some(GraphDateTime::utc(start)),
                due_date_time: Some(GraphDateTime::utc(until)),
            },
        };
        self.patch_message(message_id, &body)
    }

    fn patch_message<T: Serialize>(&self, message_id: &str, body: &T) -> Result<(), GraphError> {
        let message_id = message_id.trim();
        if message_id.is_empty() {
            return Err(GraphError::EmptyMessageId);
        }
        let url = format!(
            "{}/me/messages/{}",
            self.base_url,
            urlencoding::encode(message_id)
        );
        let response = self
            .http
            .patch(&url)
            .bearer_auth(&self.access_token)
            .json(body)
            .send()?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let text = response.text().unwrap_or_default();
        Err(GraphError::Api {
            status: status.as_u16(),
            message: api_error_message(&text),
        })
    }
}

fn api_error_message(body: &str) -> String {
    match serde_json::from_str::<GraphErrorEnvelope>(body) {
        Ok(envelope) => match envelope.error.message {
            Some(message) if !message.trim().is_empty() => message,
            _ => envelope.error.code.unwrap_or_else(|| "unknown error".to_string()),
        },
        Err(_) if !body.trim().is_empty() => body.trim().to_string(),
        Err(_) => "unknown error".to_string(),
    }
}

#[derive(Debug, Serialize)]
struct FlagUpdate {
    flag: FollowupFlag,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FollowupFlag {
    flag_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_date_time: Option<GraphDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    due_date_time: Option<GraphDateTime>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphDateTime {
    date_time: String,
    time_zone: String,
}

impl GraphDateTime {
    fn utc(value: DateTime<Utc>) -> Self {
        Self {
            date_time: value.format(GRAPH_DATETIME_FORMAT).to_string(),
            time_zone: "UTC".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GraphErrorEnvelope {
    error: GraphErrorBody,
}

#[derive(Debug, Deserialize)]
struct GraphErrorBody {
    code: Option<String>,
    message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mockito::Matcher;

    fn client_for(server: &mockito::ServerGuard) -> GraphClient {
        GraphClient::with_base_url("token-1", &server.url(), Duration::from_secs(5))
            .expect("client")
    }

    #[test]
    fn snooze_patches_followup_flag() {
        let mut server = mockito::Server::new();
        let until = Utc.with_ymd_and_hms(2031, 3, 1, 9, 30, 0).unwrap();
        let mock = server
            .mock("PATCH", "/me/messages/AAMk-1")
            .match_header("authorization", "Bearer token-1")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "flag": {
                    "flagStatus": "flagged",
                    "dueDateTime": {
                        "dateTime": "2031-03-01T09:30:00",
                        "timeZone": "UTC"
                    }
                }
            })))
            .with_status(200)
            .with_body("{}")
            .create();

        client_for(&server)
            .snooze_message("AAMk-1", until)
            .expect("snooze");
        mock.assert();
    }

    #[test]
    fn snooze_in_the_past_starts_at_due_date() {
        let mut server = mockito::Server::new();
        let until = Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap();
        let mock = server
            .mock("PATCH", "/me/messages/m-1")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "flag": {
                    "startDateTime": { "dateTime": "2020-01-02T03:04:05" },
                    "dueDateTime": { "dateTime": "2020-01-02T03:04:05" }
                }
            })))
            .with_status(200)
            .create();

        client_for(&server)
            .snooze_message("m-1", until)
            .expect("snooze");
        mock.assert();
    }

    #[test]
    fn message_id_is_path_encoded() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("PATCH", "/me/messages/abc%2Fdef%3D")
            .with_status(200)
            .create();

        client_for(&server)
            .snooze_message("abc/def=", Utc::now())
            .expect("snooze");
        mock.assert();
    }

    #[test]
    fn trailing_slash_in_base_url_is_ignored() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("PATCH", "/v1.0/me/messages/AAMk-2")
            .with_status(200)
            .create();

        let base_url = format!("{}/v1.0/", server.url());
        GraphClient::with_base_url("token-1", &base_url, Duration::from_secs(5))
            .expect("client")
            .snooze_message("AAMk-2", Utc::now())
            .expect("snooze");
        mock.assert();
    }

    #[test]
    fn api_errors_carry_graph_message() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("PATCH", "/me/messages/gone")
            .with_status(404)
            .with_body(r#"{"error":{"code":"ErrorItemNotFound","message":"The specified object was not found in the store."}}"#)
            .create();

        let err = client_for(&server)
            .snooze_message("gone", Utc::now())
            .unwrap_err();
        match err {
            GraphError::Api { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "The specified object was not found in the store.");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_blank_token_and_message_id() {
        assert!(matches!(
            GraphClient::new("   "),
            Err(GraphError::MissingAccessToken)
        ));
        let client = GraphClient::new("token").expect("client");
        assert!(matches!(
            client.snooze_message(" ", Utc::now()),
            Err(GraphError::EmptyMessageId)
        ));
    }

    #[test]
    fn api_error_message_falls_back_to_code_and_body() {
        assert_eq!(
            api_error_message(r#"{"error":{"code":"InvalidAuthenticationToken"}}"#),
            "InvalidAuthenticationToken"
        );
        assert_eq!(api_error_message("upstream timeout"), "upstream timeout");
        assert_eq!(api_error_message(""), "unknown error");
    }
}
