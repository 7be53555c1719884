//! Profile routes: bootstrap, balance, history, plan, and preferences.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use uuid::Uuid;

use super::{json_body, path_param, query_params};
use crate::error::ApiError;
use crate::services::ledger::{self, ProfileError, SettingsRequest};
use crate::state::AppState;
use crate::store::{Profile, Transaction};

#[derive(Debug, Deserialize)]
pub struct CreateProfileBody {
    pub user_id: Uuid,
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SelectPlanBody {
    pub plan_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct SettingsBody {
    pub selected_model: Option<String>,
    pub settings: Option<serde_json::Value>,
}

/// `POST /api/profiles`: create the caller's profile on first login.
pub async fn create_profile(
    State(state): State<AppState>,
    body: Result<Json<CreateProfileBody>, JsonRejection>,
) -> Result<Json<Profile>, ApiError> {
    let body = json_body(body)?;
    ledger::ensure_profile(
        state.store.as_ref(),
        body.user_id,
        body.username.as_deref(),
        state.relay.initial_balance,
    )
    .await
    .map(Json)
    .map_err(into_api_error)
}

/// `GET /api/profiles/:id`: profile with current balance.
pub async fn get_profile(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Profile>, ApiError> {
    let user_id = path_param(path)?;
    ledger::get_profile(state.store.as_ref(), user_id)
        .await
        .map(Json)
        .map_err(into_api_error)
}

/// `GET /api/profiles/:id/transactions`: newest-first ledger page.
pub async fn list_transactions(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<Vec<Transaction>>, ApiError> {
    let user_id = path_param(path)?;
    let query = query_params(query)?;
    ledger::history(state.store.as_ref(), user_id, query.limit)
        .await
        .map(Json)
        .map_err(into_api_error)
}

/// `POST /api/profiles/:id/plan`: select a tariff.
pub async fn select_plan(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<SelectPlanBody>, JsonRejection>,
) -> Result<Json<Profile>, ApiError> {
    let user_id = path_param(path)?;
    let body = json_body(body)?;
    ledger::select_plan(state.store.as_ref(), user_id, body.plan_id)
        .await
        .map(Json)
        .map_err(into_api_error)
}

/// `PATCH /api/profiles/:id/settings`: update model and UI settings.
pub async fn update_settings(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<SettingsBody>, JsonRejection>,
) -> Result<Json<Profile>, ApiError> {
    let user_id = path_param(path)?;
    let body = json_body(body)?;
    let request = SettingsRequest { selected_model: body.selected_model, settings: body.settings };
    ledger::update_settings(state.store.as_ref(), user_id, request)
        .await
        .map(Json)
        .map_err(into_api_error)
}

pub(crate) fn profile_error_status(err: &ProfileError) -> StatusCode {
    match err {
        ProfileError::Validation(_) => StatusCode::BAD_REQUEST,
        ProfileError::ProfileNotFound(_) | ProfileError::PlanNotFound(_) => StatusCode::NOT_FOUND,
        ProfileError::Ledger(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn into_api_error(err: ProfileError) -> ApiError {
    ApiError::new(profile_error_status(&err), &err)
}

#[cfg(test)]
#[path = "profiles_test.rs"]
mod tests;
