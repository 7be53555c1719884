//! Tariff catalogue route.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;

use crate::error::ApiError;
use crate::state::AppState;
use crate::store::Tariff;

/// `GET /api/plans`: list purchasable plans, cheapest first.
pub async fn list_plans(State(state): State<AppState>) -> Result<Json<Vec<Tariff>>, ApiError> {
    state
        .store
        .tariffs()
        .await
        .map(Json)
        .map_err(|err| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, &err))
}
