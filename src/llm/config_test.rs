use super::*;
use std::sync::{Mutex, MutexGuard};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn env_guard() -> MutexGuard<'static, ()> {
    ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// # Safety
/// Callers must hold `env_guard()`.
unsafe fn clear_llm_env() {
    unsafe {
        std::env::remove_var("LLM_MODEL");
        std::env::remove_var("LLM_API_KEY_ENV");
        std::env::remove_var("LLM_BASE_URL");
        std::env::remove_var("LLM_REQUEST_TIMEOUT_SECS");
        std::env::remove_var("LLM_CONNECT_TIMEOUT_SECS");
        std::env::remove_var("OPENAI_API_KEY");
        std::env::remove_var("CATALEYA_TEST_KEY");
    }
}

#[test]
fn from_env_defaults_to_openai_key() {
    let _guard = env_guard();
    unsafe {
        clear_llm_env();
        std::env::set_var("OPENAI_API_KEY", "sk-test");
    }

    let cfg = LlmConfig::from_env().unwrap();
    assert_eq!(cfg.api_key, "sk-test");
    assert_eq!(cfg.model, DEFAULT_LLM_MODEL);
    assert_eq!(cfg.base_url, DEFAULT_OPENAI_BASE_URL);
    assert_eq!(
        cfg.timeouts,
        LlmTimeouts { request_secs: DEFAULT_LLM_REQUEST_TIMEOUT_SECS, connect_secs: DEFAULT_LLM_CONNECT_TIMEOUT_SECS }
    );

    unsafe { clear_llm_env() };
}

#[test]
fn from_env_parses_overrides() {
    let _guard = env_guard();
    unsafe {
        clear_llm_env();
        std::env::set_var("LLM_API_KEY_ENV", "CATALEYA_TEST_KEY");
        std::env::set_var("CATALEYA_TEST_KEY", "secret");
        std::env::set_var("LLM_MODEL", "gpt-4.1");
        std::env::set_var("LLM_BASE_URL", "https://example.test/v1/");
        std::env::set_var("LLM_REQUEST_TIMEOUT_SECS", "42");
        std::env::set_var("LLM_CONNECT_TIMEOUT_SECS", "7");
    }

    let cfg = LlmConfig::from_env().unwrap();
    assert_eq!(cfg.api_key, "secret");
    assert_eq!(cfg.model, "gpt-4.1");
    assert_eq!(cfg.base_url, "https://example.test/v1");
    assert_eq!(cfg.timeouts, LlmTimeouts { request_secs: 42, connect_secs: 7 });

    unsafe { clear_llm_env() };
}

#[test]
fn from_env_missing_key_names_variable() {
    let _guard = env_guard();
    unsafe { clear_llm_env() };

    let err = LlmConfig::from_env().unwrap_err();
    assert!(matches!(&err, LlmError::MissingApiKey { var } if var == "OPENAI_API_KEY"));
}

#[test]
fn from_env_empty_key_is_missing() {
    let _guard = env_guard();
    unsafe {
        clear_llm_env();
        std::env::set_var("OPENAI_API_KEY", "   ");
    }

    assert!(matches!(LlmConfig::from_env(), Err(LlmError::MissingApiKey { .. })));

    unsafe { clear_llm_env() };
}

#[test]
fn from_env_zero_timeout_errors() {
    let _guard = env_guard();
    unsafe {
        clear_llm_env();
        std::env::set_var("OPENAI_API_KEY", "sk-test");
        std::env::set_var("LLM_REQUEST_TIMEOUT_SECS", "0");
    }

    let err = LlmConfig::from_env().unwrap_err().to_string();
    assert!(err.contains("timeouts"));

    unsafe { clear_llm_env() };
}
