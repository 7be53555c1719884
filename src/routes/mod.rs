//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! This module binds the JSON API under a single Axum router: the chat
//! relay, the token ledger endpoint, and the profile/plan routes that back
//! the dashboard. Every failure renders as `{"error", "code"}` via
//! [`ApiError`].

pub mod chat;
pub mod plans;
pub mod profiles;
pub mod tokens;

use axum::Router;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, patch, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::state::AppState;

/// Build the full API router.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/chat", post(chat::chat))
        .route("/api/tokens/credit", post(tokens::credit))
        .route("/api/profiles", post(profiles::create_profile))
        .route("/api/profiles/{id}", get(profiles::get_profile))
        .route("/api/profiles/{id}/transactions", get(profiles::list_transactions))
        .route("/api/profiles/{id}/plan", post(profiles::select_plan))
        .route("/api/profiles/{id}/settings", patch(profiles::update_settings))
        .route("/api/plans", get(plans::list_plans))
        .route("/healthz", get(healthz))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// Unwrap a JSON body, turning any extractor rejection into a 400 with the
/// standard error body.
pub(crate) fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))
}

/// Same as [`json_body`] for path parameters.
pub(crate) fn path_param<T>(path: Result<Path<T>, PathRejection>) -> Result<T, ApiError> {
    path.map(|Path(value)| value)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))
}

/// Same as [`json_body`] for query strings.
pub(crate) fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    query
        .map(|Query(value)| value)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
