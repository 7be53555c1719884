//! Application configuration parsed from environment variables.
//!
//! SYSTEM CONTEXT
//! ==============
//! `main` loads `.env` (if present) and then builds an [`AppConfig`]. LLM
//! provider settings live separately in [`crate::llm::config`] so the relay
//! can run with a mock provider in tests.

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_TOKEN_COST: i64 = 1;
pub const DEFAULT_INITIAL_TOKEN_BALANCE: i64 = 0;
pub const DEFAULT_CHAT_MAX_TOKENS: u32 = 800;
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Cataleya, an expert AI assistant.";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Relay and ledger policy shared by every handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Tokens debited per successful chat call.
    pub token_cost: i64,
    /// Balance given to a profile on first login.
    pub initial_balance: i64,
    /// `max_tokens` forwarded to the provider.
    pub max_tokens: u32,
    /// Prepended when a conversation carries no system message of its own.
    pub system_prompt: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            token_cost: DEFAULT_TOKEN_COST,
            initial_balance: DEFAULT_INITIAL_TOKEN_BALANCE,
            max_tokens: DEFAULT_CHAT_MAX_TOKENS,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub port: u16,
    /// `None` runs against the in-memory store.
    pub database_url: Option<String>,
    pub relay: RelayConfig,
}

impl AppConfig {
    /// Build typed config from environment variables.
    ///
    /// - `PORT`: default 3000
    /// - `DATABASE_URL`: optional
    /// - `TOKEN_COST`: default 1, must be >= 1
    /// - `INITIAL_TOKEN_BALANCE`: default 0, must be >= 0
    /// - `CHAT_MAX_TOKENS`: default 800
    /// - `CHAT_SYSTEM_PROMPT`: default Cataleya persona
    ///
    /// # Errors
    ///
    /// Returns an error when a numeric value is present but out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = env_parse("PORT", DEFAULT_PORT);
        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty());

        let token_cost = env_parse("TOKEN_COST", DEFAULT_TOKEN_COST);
        if token_cost < 1 {
            return Err(ConfigError::Invalid { key: "TOKEN_COST", reason: format!("{token_cost} is below 1") });
        }
        let initial_balance = env_parse("INITIAL_TOKEN_BALANCE", DEFAULT_INITIAL_TOKEN_BALANCE);
        if initial_balance < 0 {
            return Err(ConfigError::Invalid {
                key: "INITIAL_TOKEN_BALANCE",
                reason: format!("{initial_balance} is negative"),
            });
        }
        let system_prompt = std::env::var("CHAT_SYSTEM_PROMPT")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_owned());

        Ok(Self {
            port,
            database_url,
            relay: RelayConfig {
                token_cost,
                initial_balance,
                max_tokens: env_parse("CHAT_MAX_TOKENS", DEFAULT_CHAT_MAX_TOKENS),
                system_prompt,
            },
        })
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
