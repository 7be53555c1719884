use super::*;
use crate::error::ErrorCode;

// =============================================================================
// Role / ChatMessage serde
// =============================================================================

#[test]
fn role_serializes_lowercase() {
    let json = serde_json::to_string(&ChatMessage::assistant("hi")).unwrap();
    assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
}

#[test]
fn role_rejects_unknown_value() {
    let result = serde_json::from_str::<ChatMessage>(r#"{"role":"tool","content":"x"}"#);
    assert!(result.is_err());
}

#[test]
fn role_as_str_matches_serde_name() {
    for role in [Role::System, Role::User, Role::Assistant] {
        let json = serde_json::to_value(role).unwrap();
        assert_eq!(json.as_str(), Some(role.as_str()));
    }
}

// =============================================================================
// LlmError codes
// =============================================================================

#[test]
fn retryable_on_transport_and_server_errors() {
    assert!(LlmError::ApiRequest("reset".into()).retryable());
    assert!(LlmError::Timeout.retryable());
    assert!(LlmError::ApiResponse { status: 429, body: String::new() }.retryable());
    assert!(LlmError::ApiResponse { status: 503, body: String::new() }.retryable());
}

#[test]
fn not_retryable_on_client_errors() {
    assert!(!LlmError::ApiResponse { status: 401, body: String::new() }.retryable());
    assert!(!LlmError::ApiParse("bad".into()).retryable());
    assert!(!LlmError::MissingApiKey { var: "OPENAI_API_KEY".into() }.retryable());
}

#[test]
fn error_codes_are_distinct() {
    assert_eq!(LlmError::Timeout.error_code(), "E_API_TIMEOUT");
    assert_eq!(LlmError::ApiResponse { status: 500, body: String::new() }.error_code(), "E_API_RESPONSE");
    assert_eq!(LlmError::ConfigParse(String::new()).error_code(), "E_CONFIG_PARSE");
}

#[test]
fn api_response_display_includes_status() {
    let err = LlmError::ApiResponse { status: 502, body: "upstream".into() };
    assert_eq!(err.to_string(), "API response error: status 502");
}
