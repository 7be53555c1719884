//! Chat relay: balance hold → LLM call → settle.
//!
//! DESIGN
//! ======
//! The relay never reads a balance and writes it back. It asks the store for
//! an atomic hold of `cost` tokens before calling the provider, and either
//! settles the hold (debit + ledger row + request log, one unit of work) or
//! releases it when the provider fails. A caller-supplied `request_id` makes
//! the whole call idempotent: a replay returns the logged reply unchanged.

use tracing::{info, warn};
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::error::ErrorCode;
use crate::llm::LlmChat;
use crate::llm::types::{ChatMessage, LlmError, Role, Usage};
use crate::store::{LedgerError, LedgerStore, SettleOutcome, Settlement};

pub const AI_TYPE_CHAT: &str = "chat";
const DEBIT_DESCRIPTION: &str = "Chat request";

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("{0}")]
    Validation(String),
    #[error("profile not found: {0}")]
    ProfileNotFound(Uuid),
    #[error("insufficient token balance: {available} available, {cost} required")]
    InsufficientBalance { available: i64, cost: i64 },
    #[error("LLM not configured")]
    LlmNotConfigured,
    #[error("LLM provider error: {0}")]
    Provider(#[from] LlmError),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl ErrorCode for RelayError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "E_VALIDATION",
            Self::ProfileNotFound(_) => "E_PROFILE_NOT_FOUND",
            Self::InsufficientBalance { .. } => "E_INSUFFICIENT_BALANCE",
            Self::LlmNotConfigured => "E_LLM_NOT_CONFIGURED",
            Self::Provider(_) => "E_PROVIDER",
            Self::Ledger(_) => "E_LEDGER",
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Provider(e) => e.retryable(),
            Self::Ledger(e) => e.retryable(),
            _ => false,
        }
    }
}

/// A validated-on-entry chat call.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub user_id: Option<Uuid>,
    pub messages: Vec<ChatMessage>,
    pub request_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReply {
    pub reply: String,
    pub usage: Option<Usage>,
    pub request_id: Uuid,
    pub balance: i64,
    pub model: String,
    /// True when the reply came from the request log instead of the provider.
    pub replayed: bool,
}

// =============================================================================
// MAIN ENTRY POINT
// =============================================================================

/// Relay one conversation to the provider and charge the caller.
///
/// # Errors
///
/// See [`RelayError`]; provider and validation failures leave the balance,
/// holds, and ledger untouched.
pub async fn handle_chat(
    store: &dyn LedgerStore,
    llm: &dyn LlmChat,
    config: &RelayConfig,
    request: ChatRequest,
) -> Result<RelayReply, RelayError> {
    let user_id = validate(&request)?;
    let request_id = request.request_id.unwrap_or_else(Uuid::new_v4);

    if request.request_id.is_some() {
        if let Some(reply) = replay(store, user_id, request_id).await? {
            return Ok(reply);
        }
    }

    let profile = store
        .profile(user_id)
        .await?
        .ok_or(RelayError::ProfileNotFound(user_id))?;
    let cost = config.token_cost;

    if !store.try_hold(user_id, cost).await? {
        // A concurrent call with the same key may have settled in the meantime.
        if request.request_id.is_some() {
            if let Some(reply) = replay(store, user_id, request_id).await? {
                return Ok(reply);
            }
        }
        let available = store
            .profile(user_id)
            .await?
            .map_or(0, |p| p.available().max(0));
        info!(%user_id, cost, available, "relay: insufficient balance");
        return Err(RelayError::InsufficientBalance { available, cost });
    }

    let messages = with_system_prompt(request.messages, &config.system_prompt);
    info!(%user_id, %request_id, messages = messages.len(), cost, "relay: calling provider");

    let response = match llm
        .chat(profile.selected_model.as_deref(), config.max_tokens, &messages)
        .await
    {
        Ok(response) => response,
        Err(e) => {
            warn!(%user_id, %request_id, error = %e, "relay: provider failed, releasing hold");
            if let Err(release_err) = store.release_hold(user_id, cost).await {
                warn!(%user_id, error = %release_err, "relay: hold release failed");
            }
            return Err(RelayError::Provider(e));
        }
    };

    let settlement = Settlement {
        request_id,
        user_id,
        cost,
        description: DEBIT_DESCRIPTION.to_owned(),
        ai_type: AI_TYPE_CHAT.to_owned(),
        input: serde_json::to_value(&messages).unwrap_or(serde_json::Value::Null),
        output: response.content.clone(),
        model: response.model.clone(),
        usage: response.usage,
    };
    let outcome = match store.settle(&settlement).await {
        Ok(SettleOutcome::AlreadySettled { .. }) => {
            info!(%user_id, %request_id, "relay: request settled concurrently, returning logged reply");
            if let Some(reply) = replay(store, user_id, request_id).await? {
                return Ok(reply);
            }
            return Err(RelayError::Ledger(LedgerError::RequestIdConflict(request_id)));
        }
        Ok(outcome) => outcome,
        Err(LedgerError::RequestIdConflict(_)) => {
            if let Err(release_err) = store.release_hold(user_id, cost).await {
                warn!(%user_id, error = %release_err, "relay: hold release failed");
            }
            return Err(RelayError::Validation(format!(
                "request_id {request_id} is already used by another operation"
            )));
        }
        Err(e) => {
            warn!(%user_id, %request_id, error = %e, "relay: settle failed, releasing hold");
            if let Err(release_err) = store.release_hold(user_id, cost).await {
                warn!(%user_id, error = %release_err, "relay: hold release failed");
            }
            return Err(RelayError::Ledger(e));
        }
    };

    info!(
        %user_id,
        %request_id,
        balance = outcome.balance(),
        prompt_tokens = response.usage.map_or(0, |u| u.prompt_tokens),
        completion_tokens = response.usage.map_or(0, |u| u.completion_tokens),
        "relay: settled"
    );

    Ok(RelayReply {
        reply: response.content,
        usage: response.usage,
        request_id,
        balance: outcome.balance(),
        model: response.model,
        replayed: false,
    })
}

// =============================================================================
// HELPERS
// =============================================================================

/// Check the request shape and return the caller's id.
///
/// # Errors
///
/// [`RelayError::Validation`] for a missing `user_id` or an empty conversation.
pub fn validate(request: &ChatRequest) -> Result<Uuid, RelayError> {
    let Some(user_id) = request.user_id else {
        return Err(RelayError::Validation("missing user_id".into()));
    };
    if request.messages.is_empty() {
        return Err(RelayError::Validation("messages must not be empty".into()));
    }
    let has_prompt = request
        .messages
        .iter()
        .any(|m| m.role != Role::System && !m.content.trim().is_empty());
    if !has_prompt {
        return Err(RelayError::Validation("messages must include a non-empty user or assistant turn".into()));
    }
    Ok(user_id)
}

/// Prepend the configured system prompt unless the caller supplied one.
fn with_system_prompt(messages: Vec<ChatMessage>, system_prompt: &str) -> Vec<ChatMessage> {
    if system_prompt.trim().is_empty() || messages.iter().any(|m| m.role == Role::System) {
        return messages;
    }
    let mut out = Vec::with_capacity(messages.len() + 1);
    out.push(ChatMessage::system(system_prompt));
    out.extend(messages);
    out
}

async fn replay(store: &dyn LedgerStore, user_id: Uuid, request_id: Uuid) -> Result<Option<RelayReply>, RelayError> {
    let Some(log) = store.find_request(request_id).await? else {
        return Ok(None);
    };
    if log.user_id != user_id {
        return Err(RelayError::Validation(format!("request_id {request_id} belongs to another user")));
    }
    let balance = store
        .profile(user_id)
        .await?
        .map_or(0, |p| p.token_balance);
    info!(%user_id, %request_id, "relay: replaying settled request");

    let usage = (log.prompt_tokens > 0 || log.completion_tokens > 0).then(|| {
        let prompt_tokens = u64::try_from(log.prompt_tokens).unwrap_or(0);
        let completion_tokens = u64::try_from(log.completion_tokens).unwrap_or(0);
        Usage { prompt_tokens, completion_tokens, total_tokens: prompt_tokens + completion_tokens }
    });
    Ok(Some(RelayReply {
        reply: log.output,
        usage,
        request_id,
        balance,
        model: log.model,
        replayed: true,
    }))
}

#[cfg(test)]
#[path = "relay_test.rs"]
mod tests;
