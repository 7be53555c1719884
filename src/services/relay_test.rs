use super::*;
use crate::error::ErrorCode;
use crate::llm::types::ChatResponse;
use crate::store::{CreditEntry, MemoryLedger, TransactionKind};
use crate::state::test_helpers::MockLlm;
use std::sync::Arc;

fn request(user_id: Uuid, text: &str) -> ChatRequest {
    ChatRequest { user_id: Some(user_id), messages: vec![ChatMessage::user(text)], request_id: None }
}

// =========================================================================
// Scenarios
// =========================================================================

#[tokio::test]
async fn balance_one_reply_hello_debits_to_zero() {
    let store = MemoryLedger::new();
    let user = Uuid::new_v4();
    store.seed_profile(user, 1);
    let llm = MockLlm::replying("hello");

    let reply = handle_chat(&store, &llm, &RelayConfig::default(), request(user, "hi"))
        .await
        .unwrap();

    assert_eq!(reply.reply, "hello");
    assert_eq!(reply.balance, 0);
    assert!(!reply.replayed);
    let profile = store.profile(user).await.unwrap().unwrap();
    assert_eq!(profile.token_balance, 0);
    assert_eq!(profile.held_tokens, 0);
    let txns = store.transactions(user, 10).await.unwrap();
    assert_eq!(txns.len(), 1);
    assert_eq!(txns[0].amount, -1);
    assert_eq!(txns[0].kind, TransactionKind::Debit);
    assert_eq!(store.request_count(), 1);
}

#[tokio::test]
async fn zero_balance_is_rejected_without_provider_call() {
    let store = MemoryLedger::new();
    let user = Uuid::new_v4();
    store.seed_profile(user, 0);
    let llm = MockLlm::replying("never");

    let err = handle_chat(&store, &llm, &RelayConfig::default(), request(user, "hi"))
        .await
        .unwrap_err();

    assert!(matches!(err, RelayError::InsufficientBalance { available: 0, cost: 1 }));
    assert_eq!(err.error_code(), "E_INSUFFICIENT_BALANCE");
    assert_eq!(llm.calls(), 0);
    assert_eq!(store.profile(user).await.unwrap().unwrap().token_balance, 0);
    assert!(store.transactions(user, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn provider_failure_leaves_ledger_untouched() {
    let store = MemoryLedger::new();
    let user = Uuid::new_v4();
    store.seed_profile(user, 5);
    let llm = MockLlm::failing(|| LlmError::ApiRequest("connection reset".into()));

    let err = handle_chat(&store, &llm, &RelayConfig::default(), request(user, "hi"))
        .await
        .unwrap_err();

    assert!(matches!(err, RelayError::Provider(LlmError::ApiRequest(_))));
    assert!(err.retryable());
    let profile = store.profile(user).await.unwrap().unwrap();
    assert_eq!(profile.token_balance, 5);
    assert_eq!(profile.held_tokens, 0);
    assert!(store.transactions(user, 10).await.unwrap().is_empty());
    assert_eq!(store.request_count(), 0);
}

#[tokio::test]
async fn concurrent_calls_with_balance_one_admit_one() {
    let store = Arc::new(MemoryLedger::new());
    let user = Uuid::new_v4();
    store.seed_profile(user, 1);
    let llm = Arc::new(MockLlm::replying("hello").with_delay_ms(50));
    let config = Arc::new(RelayConfig::default());

    let spawn_call = || {
        let store = Arc::clone(&store);
        let llm = Arc::clone(&llm);
        let config = Arc::clone(&config);
        tokio::spawn(async move { handle_chat(store.as_ref(), llm.as_ref(), &config, request(user, "hi")).await })
    };
    let a = spawn_call();
    let b = spawn_call();
    let results = [a.await.unwrap(), b.await.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .any(|r| matches!(r, Err(RelayError::InsufficientBalance { .. })))
    );
    assert_eq!(llm.calls(), 1);
    let profile = store.profile(user).await.unwrap().unwrap();
    assert_eq!(profile.token_balance, 0);
    assert_eq!(store.transactions(user, 10).await.unwrap().len(), 1);
}

// =========================================================================
// Validation
// =========================================================================

#[tokio::test]
async fn missing_user_id_is_validation_error() {
    let store = MemoryLedger::new();
    let llm = MockLlm::replying("x");
    let req = ChatRequest { user_id: None, messages: vec![ChatMessage::user("hi")], request_id: None };
    let err = handle_chat(&store, &llm, &RelayConfig::default(), req)
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::Validation(msg) if msg.contains("user_id")));
}

#[tokio::test]
async fn empty_messages_is_validation_error() {
    let store = MemoryLedger::new();
    let llm = MockLlm::replying("x");
    let req = ChatRequest { user_id: Some(Uuid::new_v4()), messages: vec![], request_id: None };
    let err = handle_chat(&store, &llm, &RelayConfig::default(), req)
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::Validation(_)));
}

#[tokio::test]
async fn system_only_conversation_is_validation_error() {
    let store = MemoryLedger::new();
    let llm = MockLlm::replying("x");
    let req = ChatRequest {
        user_id: Some(Uuid::new_v4()),
        messages: vec![ChatMessage::system("persona"), ChatMessage::user("   ")],
        request_id: None,
    };
    let err = handle_chat(&store, &llm, &RelayConfig::default(), req)
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::Validation(_)));
    assert_eq!(llm.calls(), 0);
}

#[tokio::test]
async fn unknown_profile_is_not_found() {
    let store = MemoryLedger::new();
    let llm = MockLlm::replying("x");
    let user = Uuid::new_v4();
    let err = handle_chat(&store, &llm, &RelayConfig::default(), request(user, "hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::ProfileNotFound(id) if id == user));
}

// =========================================================================
// Policy
// =========================================================================

#[tokio::test]
async fn configured_cost_is_debited() {
    let store = MemoryLedger::new();
    let user = Uuid::new_v4();
    store.seed_profile(user, 10);
    let llm = MockLlm::replying("ok");
    let config = RelayConfig { token_cost: 3, ..RelayConfig::default() };

    let reply = handle_chat(&store, &llm, &config, request(user, "hi"))
        .await
        .unwrap();

    assert_eq!(reply.balance, 7);
    assert_eq!(store.transactions(user, 10).await.unwrap()[0].amount, -3);
}

#[tokio::test]
async fn balance_below_cost_is_rejected() {
    let store = MemoryLedger::new();
    let user = Uuid::new_v4();
    store.seed_profile(user, 2);
    let llm = MockLlm::replying("ok");
    let config = RelayConfig { token_cost: 3, ..RelayConfig::default() };

    let err = handle_chat(&store, &llm, &config, request(user, "hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::InsufficientBalance { available: 2, cost: 3 }));
}

#[tokio::test]
async fn system_prompt_prepended_when_absent() {
    let store = MemoryLedger::new();
    let user = Uuid::new_v4();
    store.seed_profile(user, 1);
    let llm = MockLlm::replying("ok");

    handle_chat(&store, &llm, &RelayConfig::default(), request(user, "hi"))
        .await
        .unwrap();

    let sent = llm.last_messages();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].role, Role::System);
    assert_eq!(sent[0].content, crate::config::DEFAULT_SYSTEM_PROMPT);
}

#[tokio::test]
async fn caller_system_prompt_is_kept() {
    let store = MemoryLedger::new();
    let user = Uuid::new_v4();
    store.seed_profile(user, 1);
    let llm = MockLlm::replying("ok");
    let req = ChatRequest {
        user_id: Some(user),
        messages: vec![ChatMessage::system("custom"), ChatMessage::user("hi")],
        request_id: None,
    };

    handle_chat(&store, &llm, &RelayConfig::default(), req)
        .await
        .unwrap();

    let sent = llm.last_messages();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].content, "custom");
}

#[tokio::test]
async fn selected_model_is_forwarded() {
    let store = MemoryLedger::new();
    let user = Uuid::new_v4();
    store.seed_profile(user, 1);
    let update = crate::store::PreferencesUpdate { selected_model: Some(Some("gpt-4.1".into())), settings: None };
    store.update_preferences(user, &update).await.unwrap();
    let llm = MockLlm::replying("ok");

    handle_chat(&store, &llm, &RelayConfig::default(), request(user, "hi"))
        .await
        .unwrap();

    assert_eq!(llm.last_model().as_deref(), Some("gpt-4.1"));
}

#[tokio::test]
async fn usage_is_passed_through_and_logged() {
    let store = MemoryLedger::new();
    let user = Uuid::new_v4();
    store.seed_profile(user, 1);
    let usage = Usage { prompt_tokens: 12, completion_tokens: 3, total_tokens: 15 };
    let llm = MockLlm::new(vec![Ok(ChatResponse {
        content: "hello".into(),
        model: "mock-1".into(),
        finish_reason: "stop".into(),
        usage: Some(usage),
    })]);

    let reply = handle_chat(&store, &llm, &RelayConfig::default(), request(user, "hi"))
        .await
        .unwrap();

    assert_eq!(reply.usage, Some(usage));
    let log = store.find_request(reply.request_id).await.unwrap().unwrap();
    assert_eq!(log.prompt_tokens, 12);
    assert_eq!(log.completion_tokens, 3);
    assert_eq!(log.model, "mock-1");
    assert_eq!(log.ai_type, AI_TYPE_CHAT);
    assert_eq!(log.input[1]["content"], "hi");
}

// =========================================================================
// Idempotency
// =========================================================================

#[tokio::test]
async fn replay_with_same_request_id_charges_once() {
    let store = MemoryLedger::new();
    let user = Uuid::new_v4();
    store.seed_profile(user, 5);
    let llm = MockLlm::replying("hello");
    let request_id = Uuid::new_v4();
    let req = ChatRequest { user_id: Some(user), messages: vec![ChatMessage::user("hi")], request_id: Some(request_id) };

    let first = handle_chat(&store, &llm, &RelayConfig::default(), req.clone())
        .await
        .unwrap();
    let second = handle_chat(&store, &llm, &RelayConfig::default(), req)
        .await
        .unwrap();

    assert_eq!(first.request_id, request_id);
    assert!(second.replayed);
    assert_eq!(second.reply, "hello");
    assert_eq!(second.balance, 4);
    assert_eq!(llm.calls(), 1);
    assert_eq!(store.transactions(user, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn replay_of_foreign_request_id_is_rejected() {
    let store = MemoryLedger::new();
    let owner = Uuid::new_v4();
    let other = Uuid::new_v4();
    store.seed_profile(owner, 5);
    store.seed_profile(other, 5);
    let llm = MockLlm::replying("hello");
    let request_id = Uuid::new_v4();

    let mut req = ChatRequest { user_id: Some(owner), messages: vec![ChatMessage::user("hi")], request_id: Some(request_id) };
    handle_chat(&store, &llm, &RelayConfig::default(), req.clone())
        .await
        .unwrap();
    req.user_id = Some(other);
    let err = handle_chat(&store, &llm, &RelayConfig::default(), req)
        .await
        .unwrap_err();

    assert!(matches!(err, RelayError::Validation(_)));
    assert_eq!(store.profile(other).await.unwrap().unwrap().token_balance, 5);
}

#[tokio::test]
async fn concurrent_calls_with_same_request_id_return_logged_reply() {
    let store = Arc::new(MemoryLedger::new());
    let user = Uuid::new_v4();
    store.seed_profile(user, 5);
    let scripted = |content: &str| -> Result<ChatResponse, LlmError> {
        Ok(ChatResponse { content: content.into(), model: "mock".into(), finish_reason: "stop".into(), usage: None })
    };
    let llm = Arc::new(MockLlm::new(vec![scripted("first"), scripted("second")]).with_delay_ms(50));
    let config = Arc::new(RelayConfig::default());
    let request_id = Uuid::new_v4();

    let spawn_call = || {
        let store = Arc::clone(&store);
        let llm = Arc::clone(&llm);
        let config = Arc::clone(&config);
        let req = ChatRequest { user_id: Some(user), messages: vec![ChatMessage::user("hi")], request_id: Some(request_id) };
        tokio::spawn(async move { handle_chat(store.as_ref(), llm.as_ref(), &config, req).await })
    };
    let a = spawn_call();
    let b = spawn_call();
    let (a, b) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());

    assert_eq!(a.reply, b.reply);
    assert_eq!([a.replayed, b.replayed].iter().filter(|r| **r).count(), 1);
    let profile = store.profile(user).await.unwrap().unwrap();
    assert_eq!(profile.token_balance, 4);
    assert_eq!(profile.held_tokens, 0);
    assert_eq!(store.transactions(user, 10).await.unwrap().len(), 1);
    assert_eq!(store.find_request(request_id).await.unwrap().unwrap().output, a.reply);
}

#[tokio::test]
async fn request_id_of_a_credit_is_rejected_and_hold_released() {
    let store = MemoryLedger::new();
    let user = Uuid::new_v4();
    store.seed_profile(user, 0);
    let request_id = Uuid::new_v4();
    let entry = CreditEntry { user_id: user, amount: 2, description: "Top-up".into(), request_id: Some(request_id) };
    store.credit(&entry).await.unwrap();
    let llm = MockLlm::replying("hello");

    let req = ChatRequest { user_id: Some(user), messages: vec![ChatMessage::user("hi")], request_id: Some(request_id) };
    let err = handle_chat(&store, &llm, &RelayConfig::default(), req)
        .await
        .unwrap_err();

    assert!(matches!(err, RelayError::Validation(msg) if msg.contains("already used")));
    let profile = store.profile(user).await.unwrap().unwrap();
    assert_eq!(profile.token_balance, 2);
    assert_eq!(profile.held_tokens, 0);
    assert_eq!(store.transactions(user, 10).await.unwrap().len(), 1);
    assert_eq!(store.request_count(), 0);
}
