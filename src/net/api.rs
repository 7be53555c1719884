//! HTTP client for the Cataleya API.
//!
//! Used by the `cataleya-chat` terminal client. Non-2xx responses are parsed
//! back into the server's `{error, code}` body and classified by status so
//! the chat UI can pick a localized message.
//!
//! ERROR HANDLING
//! ==============
//! Every call returns `Result<_, ApiClientError>`; nothing panics on a bad
//! status or an unreadable body.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorBody;
use crate::llm::types::{ChatMessage, Usage};
use crate::store::{Profile, Tariff, Transaction};

/// Longer than the server's provider timeout so the server answers first.
const REQUEST_TIMEOUT_SECS: u64 = 130;

// =============================================================================
// ERRORS
// =============================================================================

/// Error classes the UI distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    InsufficientBalance,
    Provider,
    Network,
    Server,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiClientError {
    #[error("request failed: {0}")]
    Network(String),
    #[error("{message} (status {status})")]
    Status { status: u16, code: String, message: String },
    #[error("response decode failed: {0}")]
    Decode(String),
    #[error("HTTP client build failed: {0}")]
    Build(String),
}

impl ApiClientError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::Network,
            Self::Status { status, .. } => error_kind_for_status(*status),
            Self::Decode(_) | Self::Build(_) => ErrorKind::Server,
        }
    }
}

pub(crate) fn error_kind_for_status(status: u16) -> ErrorKind {
    match status {
        400 | 422 => ErrorKind::Validation,
        402 => ErrorKind::InsufficientBalance,
        404 => ErrorKind::NotFound,
        502..=504 => ErrorKind::Provider,
        _ => ErrorKind::Server,
    }
}

/// Build a status error from a response body, tolerating non-JSON bodies.
pub(crate) fn status_error(status: u16, body: &str) -> ApiClientError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => ApiClientError::Status { status, code: parsed.code, message: parsed.error },
        Err(_) => ApiClientError::Status {
            status,
            code: String::new(),
            message: if body.trim().is_empty() { format!("request failed: {status}") } else { body.trim().to_owned() },
        },
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatPayload {
    pub user_id: Uuid,
    pub messages: Vec<ChatMessage>,
    pub request_id: Uuid,
}

/// Successful `POST /api/chat` response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChatReply {
    pub reply: String,
    #[serde(default)]
    pub usage: Option<Usage>,
    pub request_id: Uuid,
    pub balance: i64,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub replayed: bool,
}

#[derive(Debug, Serialize)]
struct CreditPayload<'a> {
    user_id: Uuid,
    amount: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    request_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct CreditResponse {
    profile: Profile,
}

// =============================================================================
// ENDPOINTS
// =============================================================================

fn profile_endpoint(user_id: Uuid) -> String {
    format!("/api/profiles/{user_id}")
}

fn transactions_endpoint(user_id: Uuid, limit: Option<i64>) -> String {
    match limit {
        Some(limit) => format!("/api/profiles/{user_id}/transactions?limit={limit}"),
        None => format!("/api/profiles/{user_id}/transactions"),
    }
}

// =============================================================================
// CLIENT
// =============================================================================

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// # Errors
    ///
    /// Returns [`ApiClientError::Build`] if the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self, ApiClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| ApiClientError::Build(e.to_string()))?;
        Ok(Self { http, base_url: base_url.trim_end_matches('/').to_owned() })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// `POST /api/chat`.
    ///
    /// # Errors
    ///
    /// Network failures, non-2xx statuses, or an undecodable body.
    pub async fn chat(&self, payload: &ChatPayload) -> Result<ChatReply, ApiClientError> {
        let request = self.http.post(self.url("/api/chat")).json(payload);
        send_json(request).await
    }

    /// `POST /api/tokens/credit`. A fresh `request_id` is attached so a
    /// retried call cannot double-credit.
    ///
    /// # Errors
    ///
    /// Network failures, non-2xx statuses, or an undecodable body.
    pub async fn credit(&self, user_id: Uuid, amount: i64, description: Option<&str>) -> Result<Profile, ApiClientError> {
        let payload = CreditPayload { user_id, amount, description, request_id: Uuid::new_v4() };
        let request = self
            .http
            .post(self.url("/api/tokens/credit"))
            .json(&payload);
        let response: CreditResponse = send_json(request).await?;
        Ok(response.profile)
    }

    /// `POST /api/profiles`: create-if-absent.
    ///
    /// # Errors
    ///
    /// Network failures, non-2xx statuses, or an undecodable body.
    pub async fn ensure_profile(&self, user_id: Uuid, username: Option<&str>) -> Result<Profile, ApiClientError> {
        let payload = serde_json::json!({ "user_id": user_id, "username": username });
        let request = self.http.post(self.url("/api/profiles")).json(&payload);
        send_json(request).await
    }

    /// `GET /api/profiles/{id}`.
    ///
    /// # Errors
    ///
    /// Network failures, non-2xx statuses, or an undecodable body.
    pub async fn profile(&self, user_id: Uuid) -> Result<Profile, ApiClientError> {
        send_json(self.http.get(self.url(&profile_endpoint(user_id)))).await
    }

    /// `GET /api/profiles/{id}/transactions`.
    ///
    /// # Errors
    ///
    /// Network failures, non-2xx statuses, or an undecodable body.
    pub async fn transactions(&self, user_id: Uuid, limit: Option<i64>) -> Result<Vec<Transaction>, ApiClientError> {
        send_json(self.http.get(self.url(&transactions_endpoint(user_id, limit)))).await
    }

    /// `GET /api/plans`.
    ///
    /// # Errors
    ///
    /// Network failures, non-2xx statuses, or an undecodable body.
    pub async fn plans(&self) -> Result<Vec<Tariff>, ApiClientError> {
        send_json(self.http.get(self.url("/api/plans"))).await
    }
}

async fn send_json<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<T, ApiClientError> {
    let response = request
        .send()
        .await
        .map_err(|e| ApiClientError::Network(e.to_string()))?;
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ApiClientError::Network(e.to_string()))?;
    if !status.is_success() {
        return Err(status_error(status.as_u16(), &body));
    }
    serde_json::from_str(&body).map_err(|e| ApiClientError::Decode(e.to_string()))
}

#[cfg(test)]
#[path = "api_test.rs"]
mod api_test;
