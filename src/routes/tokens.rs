//! Token ledger route.

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::json_body;
use crate::error::ApiError;
use crate::services::ledger::{self, CreditError, CreditRequest};
use crate::state::AppState;
use crate::store::Profile;

#[derive(Debug, Deserialize)]
pub struct CreditBody {
    pub user_id: Option<Uuid>,
    pub amount: Option<serde_json::Value>,
    pub description: Option<String>,
    pub request_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct CreditResponseBody {
    pub ok: bool,
    pub profile: Profile,
}

/// `POST /api/tokens/credit`: add tokens to a profile.
pub async fn credit(
    State(state): State<AppState>,
    body: Result<Json<CreditBody>, JsonRejection>,
) -> Result<Json<CreditResponseBody>, ApiError> {
    let body = json_body(body)?;
    let request = CreditRequest {
        user_id: body.user_id,
        amount: body.amount,
        description: body.description,
        request_id: body.request_id,
    };

    let profile = ledger::credit(state.store.as_ref(), request)
        .await
        .map_err(|err| ApiError::new(credit_error_status(&err), &err))?;
    Ok(Json(CreditResponseBody { ok: true, profile }))
}

pub(crate) fn credit_error_status(err: &CreditError) -> StatusCode {
    match err {
        CreditError::Validation(_) => StatusCode::BAD_REQUEST,
        CreditError::ProfileNotFound(_) => StatusCode::NOT_FOUND,
        CreditError::Ledger(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
#[path = "tokens_test.rs"]
mod tests;
