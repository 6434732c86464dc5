mod test_support;

use chrono::{DateTime, Duration, Utc};
use deferral_module::adapters::GraphMailboxProvider;
use deferral_module::mailbox::NoMailbox;
use deferral_module::service::{build_router, AppState, SupabaseAuth};
use deferral_module::{
    DeferralStore, Deferrals, MessageRecord, SqliteDeferralStore, ThreadState,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use test_support::start_mockito_server;
use uuid::Uuid;

struct Harness {
    _temp: TempDir,
    _supabase: mockito::ServerGuard,
    _auth_mocks: Vec<mockito::Mock>,
    store: Arc<SqliteDeferralStore>,
    base_url: String,
    http: reqwest::Client,
    alice: Uuid,
    bob: Uuid,
}

impl Harness {
    async fn start(test_name: &str, graph_url: Option<String>) -> Option<Self> {
        let mut supabase = start_mockito_server(test_name).await?;
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let mut auth_mocks = Vec::new();
        for (token, user) in [("alice-token", alice), ("bob-token", bob)] {
            let mock = supabase
                .mock("GET", "/auth/v1/user")
                .match_header("authorization", format!("Bearer {}", token).as_str())
                .with_status(200)
                .with_body(json!({ "id": user, "email": format!("{}@example.com", token) }).to_string())
                .expect_at_least(0)
                .create_async()
                .await;
            auth_mocks.push(mock);
        }
        let expired = supabase
            .mock("GET", "/auth/v1/user")
            .match_header("authorization", "Bearer expired-token")
            .with_status(401)
            .with_body(r#"{"msg":"invalid JWT"}"#)
            .expect_at_least(0)
            .create_async()
            .await;
        auth_mocks.push(expired);

        let temp = TempDir::new().expect("tempdir");
        let store =
            Arc::new(SqliteDeferralStore::new(temp.path().join("deferrals.db")).expect("store"));
        let deferrals = match graph_url {
            Some(url) => Deferrals::new(
                store.clone(),
                Arc::new(GraphMailboxProvider::new(store.clone()).with_base_url(url)),
            ),
            None => Deferrals::new(store.clone(), Arc::new(NoMailbox)),
        };
        let state = AppState {
            deferrals,
            auth: SupabaseAuth::new(Some(supabase.url()), Some("anon-key".to_string())),
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, build_router(state)).await;
        });

        Some(Self {
            _temp: temp,
            _supabase: supabase,
            _auth_mocks: auth_mocks,
            store,
            base_url: format!("http://{}", addr),
            http: reqwest::Client::new(),
            alice,
            bob,
        })
    }

    fn seed_thread(&self, user_id: Uuid, subject: &str) -> Uuid {
        let mut thread = ThreadState::new(Uuid::new_v4(), user_id);
        thread.subject = Some(subject.to_string());
        thread.participants = vec!["sender@example.com".to_string()];
        thread.last_message_at = Some(Utc::now() - Duration::hours(2));
        self.store.upsert_thread(&thread).expect("thread");
        thread.id
    }

    fn thread(&self, user_id: Uuid, thread_id: Uuid) -> ThreadState {
        self.store
            .find_thread(user_id, thread_id)
            .expect("find")
            .expect("thread")
    }

    async fn post(&self, path: &str, token: &str, body: Value) -> (u16, Value) {
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .expect("request");
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    async fn get(&self, path: &str, token: &str) -> (u16, Value) {
        self.get_with_query(path, token, &[]).await
    }

    async fn get_with_query(
        &self,
        path: &str,
        token: &str,
        query: &[(&str, &str)],
    ) -> (u16, Value) {
        let resp = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .query(query)
            .bearer_auth(token)
            .send()
            .await
            .expect("request");
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap_or(Value::Null))
    }
}

fn rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339()
}

#[tokio::test(flavor = "multi_thread")]
async fn defer_preview_and_reconcile_over_http() {
    let Some(harness) = Harness::start("defer_preview_and_reconcile_over_http", None).await else {
        return;
    };
    let thread_id = harness.seed_thread(harness.alice, "Quarterly numbers");
    let until = Utc::now() + Duration::hours(1);

    let (status, record) = harness
        .post(
            &format!("/api/threads/{}/defer", thread_id),
            "alice-token",
            json!({ "defer_until": rfc3339(until) }),
        )
        .await;
    assert_eq!(status, 201);
    assert_eq!(record["thread_id"], json!(thread_id));
    assert_eq!(record["processed"], json!(false));
    assert!(harness.thread(harness.alice, thread_id).is_hidden);

    let later = rfc3339(until + Duration::minutes(1));
    let (status, body) = harness
        .get_with_query(
            "/api/deferrals/due",
            "alice-token",
            &[("now", later.as_str())],
        )
        .await;
    assert_eq!(status, 200);
    let due = body["due"].as_array().expect("due list");
    assert_eq!(due.len(), 1);
    assert_eq!(due[0]["thread"]["subject"], json!("Quarterly numbers"));
    assert!(harness.thread(harness.alice, thread_id).is_hidden);

    let (status, body) = harness
        .post("/api/deferrals/reconcile", "alice-token", json!({}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["processed"], json!([]));

    let (status, body) = harness
        .post(
            "/api/deferrals/reconcile",
            "alice-token",
            json!({ "now": later }),
        )
        .await;
    assert_eq!(status, 200);
    let processed = body["processed"].as_array().expect("processed list");
    assert_eq!(processed.len(), 1);
    assert_eq!(processed[0]["processed"], json!(true));
    assert!(!harness.thread(harness.alice, thread_id).is_hidden);

    let (status, body) = harness
        .get(&format!("/api/threads/{}/deferrals", thread_id), "alice-token")
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["deferrals"].as_array().map(Vec::len), Some(1));
}

#[tokio::test(flavor = "multi_thread")]
async fn requests_are_scoped_to_the_caller() {
    let Some(harness) = Harness::start("requests_are_scoped_to_the_caller", None).await else {
        return;
    };
    let thread_id = harness.seed_thread(harness.alice, "Private");

    let (status, body) = harness
        .post(
            &format!("/api/threads/{}/defer", thread_id),
            "bob-token",
            json!({ "defer_until": rfc3339(Utc::now()) }),
        )
        .await;
    assert_eq!(status, 404);
    assert!(body["error"].as_str().unwrap_or_default().contains("not found"));
    assert!(!harness.thread(harness.alice, thread_id).is_hidden);

    let (status, _) = harness
        .get(&format!("/api/threads/{}/deferrals", thread_id), "bob-token")
        .await;
    assert_eq!(status, 404);

    harness
        .post(
            &format!("/api/threads/{}/defer", thread_id),
            "alice-token",
            json!({ "defer_until": rfc3339(Utc::now() - Duration::minutes(1)) }),
        )
        .await;
    let (status, body) = harness
        .post("/api/deferrals/reconcile", "bob-token", json!({}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["processed"], json!([]));
    assert!(harness.thread(harness.alice, thread_id).is_hidden);
    assert_ne!(harness.alice, harness.bob);
}

#[tokio::test(flavor = "multi_thread")]
async fn bad_requests_return_json_errors() {
    let Some(harness) = Harness::start("bad_requests_return_json_errors", None).await else {
        return;
    };
    let thread_id = harness.seed_thread(harness.alice, "Inputs");

    let resp = harness
        .http
        .post(format!("{}/api/deferrals/reconcile", harness.base_url))
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status().as_u16(), 401);

    let (status, _) = harness
        .post("/api/deferrals/reconcile", "expired-token", json!({}))
        .await;
    assert_eq!(status, 401);

    let (status, body) = harness
        .post(
            &format!("/api/threads/{}/defer", thread_id),
            "alice-token",
            json!({ "defer_until": "whenever" }),
        )
        .await;
    assert_eq!(status, 400);
    assert!(body["error"].as_str().unwrap_or_default().contains("defer_until"));

    let (status, _) = harness
        .post(
            "/api/threads/not-a-uuid/defer",
            "alice-token",
            json!({ "defer_until": rfc3339(Utc::now()) }),
        )
        .await;
    assert_eq!(status, 400);

    let (status, _) = harness
        .get_with_query("/api/deferrals/due", "alice-token", &[("now", "yesterday")])
        .await;
    assert_eq!(status, 400);
    assert!(harness
        .store
        .deferrals_for_thread(harness.alice, thread_id)
        .expect("history")
        .is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn defer_mirrors_snooze_to_graph_and_survives_rejection() {
    let Some(mut graph) =
        start_mockito_server("defer_mirrors_snooze_to_graph_and_survives_rejection").await
    else {
        return;
    };
    let ok_mock = graph
        .mock("PATCH", "/me/messages/AAMk-ok")
        .match_header("authorization", "Bearer alice-graph")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;
    let rejected_mock = graph
        .mock("PATCH", "/me/messages/AAMk-rejected")
        .with_status(503)
        .with_body(r#"{"error":{"code":"ServiceUnavailable","message":"try later"}}"#)
        .create_async()
        .await;
    let Some(harness) = Harness::start(
        "defer_mirrors_snooze_to_graph_and_survives_rejection",
        Some(graph.url()),
    )
    .await
    else {
        return;
    };
    harness
        .store
        .upsert_mail_account(harness.alice, "alice-graph")
        .expect("account");

    for remote_id in ["AAMk-ok", "AAMk-rejected"] {
        let thread_id = harness.seed_thread(harness.alice, remote_id);
        harness
            .store
            .insert_message(&MessageRecord {
                id: Uuid::new_v4(),
                user_id: harness.alice,
                thread_id,
                remote_message_id: Some(remote_id.to_string()),
                received_at: Utc::now() - Duration::minutes(30),
            })
            .expect("message");

        let (status, _) = harness
            .post(
                &format!("/api/threads/{}/defer", thread_id),
                "alice-token",
                json!({ "deferUntil": rfc3339(Utc::now() + Duration::days(1)) }),
            )
            .await;
        assert_eq!(status, 201);
        assert!(harness.thread(harness.alice, thread_id).is_hidden);
    }

    ok_mock.assert_async().await;
    rejected_mock.assert_async().await;
}
