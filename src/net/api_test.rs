use super::*;
use std::sync::Arc;

use crate::state::test_helpers::{MockLlm, test_app_state_with_llm};
use crate::store::MemoryLedger;

// =============================================================
// Endpoint formatting
// =============================================================

#[test]
fn profile_endpoint_formats_path() {
    let id = Uuid::nil();
    assert_eq!(profile_endpoint(id), "/api/profiles/00000000-0000-0000-0000-000000000000");
}

#[test]
fn transactions_endpoint_appends_limit() {
    let id = Uuid::nil();
    assert_eq!(
        transactions_endpoint(id, Some(5)),
        "/api/profiles/00000000-0000-0000-0000-000000000000/transactions?limit=5"
    );
    assert!(!transactions_endpoint(id, None).contains('?'));
}

#[test]
fn base_url_trailing_slash_is_trimmed() {
    let client = ApiClient::new("http://localhost:3000/").unwrap();
    assert_eq!(client.url("/api/chat"), "http://localhost:3000/api/chat");
}

// =============================================================
// Error classification
// =============================================================

#[test]
fn status_classes() {
    assert_eq!(error_kind_for_status(400), ErrorKind::Validation);
    assert_eq!(error_kind_for_status(402), ErrorKind::InsufficientBalance);
    assert_eq!(error_kind_for_status(404), ErrorKind::NotFound);
    assert_eq!(error_kind_for_status(502), ErrorKind::Provider);
    assert_eq!(error_kind_for_status(504), ErrorKind::Provider);
    assert_eq!(error_kind_for_status(500), ErrorKind::Server);
}

#[test]
fn status_error_parses_json_body() {
    let err = status_error(402, r#"{"error":"insufficient token balance","code":"E_INSUFFICIENT_BALANCE"}"#);
    match &err {
        ApiClientError::Status { status, code, message } => {
            assert_eq!(*status, 402);
            assert_eq!(code, "E_INSUFFICIENT_BALANCE");
            assert_eq!(message, "insufficient token balance");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.kind(), ErrorKind::InsufficientBalance);
}

#[test]
fn status_error_tolerates_plain_text_and_empty_bodies() {
    let err = status_error(400, "Invalid URL");
    assert!(matches!(err, ApiClientError::Status { ref message, .. } if message == "Invalid URL"));
    let err = status_error(500, "");
    assert!(matches!(err, ApiClientError::Status { ref message, .. } if message == "request failed: 500"));
}

#[test]
fn network_errors_classify_as_network() {
    assert_eq!(ApiClientError::Network("refused".into()).kind(), ErrorKind::Network);
}

// =============================================================
// Against a running router
// =============================================================

async fn serve(llm: MockLlm) -> (ApiClient, MemoryLedger) {
    let (state, store) = test_app_state_with_llm(Arc::new(llm));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, crate::routes::app(state)).await.unwrap();
    });
    (ApiClient::new(&format!("http://{addr}")).unwrap(), store)
}

#[tokio::test]
async fn chat_round_trip_through_server() {
    let (client, store) = serve(MockLlm::replying("hello")).await;
    let user = Uuid::new_v4();
    store.seed_profile(user, 2);

    let payload = ChatPayload { user_id: user, messages: vec![ChatMessage::user("hi")], request_id: Uuid::new_v4() };
    let reply = client.chat(&payload).await.unwrap();

    assert_eq!(reply.reply, "hello");
    assert_eq!(reply.balance, 1);
    assert_eq!(reply.request_id, payload.request_id);
}

#[tokio::test]
async fn insufficient_balance_surfaces_as_kind() {
    let (client, store) = serve(MockLlm::replying("never")).await;
    let user = Uuid::new_v4();
    store.seed_profile(user, 0);

    let payload = ChatPayload { user_id: user, messages: vec![ChatMessage::user("hi")], request_id: Uuid::new_v4() };
    let err = client.chat(&payload).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InsufficientBalance);
}

#[tokio::test]
async fn credit_profile_and_history_through_server() {
    let (client, _) = serve(MockLlm::replying("x")).await;
    let user = Uuid::new_v4();

    let created = client.ensure_profile(user, Some("cli")).await.unwrap();
    assert_eq!(created.token_balance, 0);

    let credited = client.credit(user, 25, Some("Top-up")).await.unwrap();
    assert_eq!(credited.token_balance, 25);

    let fetched = client.profile(user).await.unwrap();
    assert_eq!(fetched.token_balance, 25);

    let history = client.transactions(user, Some(10)).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].description, "Top-up");

    assert_eq!(client.plans().await.unwrap().len(), 3);
}

#[tokio::test]
async fn unknown_profile_is_not_found_kind() {
    let (client, _) = serve(MockLlm::replying("x")).await;
    let err = client.profile(Uuid::new_v4()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn unreachable_server_is_network_error() {
    let client = ApiClient::new("http://127.0.0.1:1").unwrap();
    let err = client.profile(Uuid::new_v4()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);
}
