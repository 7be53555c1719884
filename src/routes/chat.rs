//! Chat relay route.

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::json_body;
use crate::error::ApiError;
use crate::llm::types::{ChatMessage, LlmError, Usage};
use crate::services::relay::{self, ChatRequest, RelayError, RelayReply};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    pub request_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponseBody {
    pub reply: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    pub request_id: Uuid,
    pub balance: i64,
    pub model: String,
    pub replayed: bool,
}

impl From<RelayReply> for ChatResponseBody {
    fn from(reply: RelayReply) -> Self {
        Self {
            reply: reply.reply,
            usage: reply.usage,
            request_id: reply.request_id,
            balance: reply.balance,
            model: reply.model,
            replayed: reply.replayed,
        }
    }
}

/// `POST /api/chat`: relay a conversation and debit the caller.
pub async fn chat(
    State(state): State<AppState>,
    body: Result<Json<ChatBody>, JsonRejection>,
) -> Result<Json<ChatResponseBody>, ApiError> {
    let body = json_body(body)?;
    let request = ChatRequest { user_id: body.user_id, messages: body.messages, request_id: body.request_id };
    relay::validate(&request).map_err(|err| ApiError::new(relay_error_status(&err), &err))?;

    let Some(llm) = state.llm.as_deref() else {
        let err = RelayError::LlmNotConfigured;
        return Err(ApiError::new(relay_error_status(&err), &err));
    };

    relay::handle_chat(state.store.as_ref(), llm, &state.relay, request)
        .await
        .map(|reply| Json(reply.into()))
        .map_err(|err| ApiError::new(relay_error_status(&err), &err))
}

pub(crate) fn relay_error_status(err: &RelayError) -> StatusCode {
    match err {
        RelayError::Validation(_) => StatusCode::BAD_REQUEST,
        RelayError::ProfileNotFound(_) => StatusCode::NOT_FOUND,
        RelayError::InsufficientBalance { .. } => StatusCode::PAYMENT_REQUIRED,
        RelayError::LlmNotConfigured => StatusCode::SERVICE_UNAVAILABLE,
        RelayError::Provider(LlmError::Timeout) => StatusCode::GATEWAY_TIMEOUT,
        RelayError::Provider(_) => StatusCode::BAD_GATEWAY,
        RelayError::Ledger(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
#[path = "chat_test.rs"]
mod tests;
