use super::*;
use std::sync::{Mutex, MutexGuard};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn env_guard() -> MutexGuard<'static, ()> {
    ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// # Safety
/// Callers must hold `env_guard()`.
unsafe fn clear_app_env() {
    unsafe {
        std::env::remove_var("PORT");
        std::env::remove_var("DATABASE_URL");
        std::env::remove_var("TOKEN_COST");
        std::env::remove_var("INITIAL_TOKEN_BALANCE");
        std::env::remove_var("CHAT_MAX_TOKENS");
        std::env::remove_var("CHAT_SYSTEM_PROMPT");
    }
}

#[test]
fn from_env_defaults() {
    let _guard = env_guard();
    unsafe { clear_app_env() };

    let cfg = AppConfig::from_env().unwrap();
    assert_eq!(cfg.port, DEFAULT_PORT);
    assert!(cfg.database_url.is_none());
    assert_eq!(cfg.relay, RelayConfig::default());
    assert_eq!(cfg.relay.system_prompt, DEFAULT_SYSTEM_PROMPT);
}

#[test]
fn from_env_parses_overrides() {
    let _guard = env_guard();
    unsafe {
        clear_app_env();
        std::env::set_var("PORT", "8080");
        std::env::set_var("DATABASE_URL", "postgres://localhost/cataleya");
        std::env::set_var("TOKEN_COST", "3");
        std::env::set_var("INITIAL_TOKEN_BALANCE", "25");
        std::env::set_var("CHAT_MAX_TOKENS", "256");
        std::env::set_var("CHAT_SYSTEM_PROMPT", "Be brief.");
    }

    let cfg = AppConfig::from_env().unwrap();
    assert_eq!(cfg.port, 8080);
    assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/cataleya"));
    assert_eq!(cfg.relay.token_cost, 3);
    assert_eq!(cfg.relay.initial_balance, 25);
    assert_eq!(cfg.relay.max_tokens, 256);
    assert_eq!(cfg.relay.system_prompt, "Be brief.");

    unsafe { clear_app_env() };
}

#[test]
fn from_env_rejects_zero_cost() {
    let _guard = env_guard();
    unsafe {
        clear_app_env();
        std::env::set_var("TOKEN_COST", "0");
    }

    let err = AppConfig::from_env().unwrap_err().to_string();
    assert!(err.contains("TOKEN_COST"));

    unsafe { clear_app_env() };
}

#[test]
fn from_env_blank_database_url_is_none() {
    let _guard = env_guard();
    unsafe {
        clear_app_env();
        std::env::set_var("DATABASE_URL", "  ");
    }

    let cfg = AppConfig::from_env().unwrap();
    assert!(cfg.database_url.is_none());

    unsafe { clear_app_env() };
}

#[test]
fn env_parse_invalid_returns_default() {
    unsafe { std::env::set_var("__CATALEYA_EP_INVALID__", "notanumber") };
    let val: i64 = env_parse("__CATALEYA_EP_INVALID__", 7);
    assert_eq!(val, 7);
    unsafe { std::env::remove_var("__CATALEYA_EP_INVALID__") };
}
