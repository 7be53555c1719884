//! Token ledger service: manual credits and profile bookkeeping.
//!
//! SYSTEM CONTEXT
//! ==============
//! Credits are the only way a balance goes up. Each credit is one store
//! transaction (balance increment + ledger row). A `request_id` reused by
//! the same user's credit is answered with the current profile and no second
//! credit; a key owned by another user or by a chat debit is rejected.
//!
//! The profile helpers back the dashboard-style routes: first-login
//! bootstrap, balance lookup, transaction history, plan selection, and
//! model/settings preferences.

use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::error::ErrorCode;
use crate::store::{CreditEntry, CreditOutcome, LedgerError, LedgerStore, PlanSelection, PreferencesUpdate, Profile, Transaction};

pub const DEFAULT_CREDIT_DESCRIPTION: &str = "Manual credit";
pub const DEFAULT_HISTORY_LIMIT: i64 = 50;
pub const MAX_HISTORY_LIMIT: i64 = 200;
const MAX_USERNAME_LEN: usize = 64;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CreditError {
    #[error("{0}")]
    Validation(String),
    #[error("profile not found: {0}")]
    ProfileNotFound(Uuid),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl ErrorCode for CreditError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "E_VALIDATION",
            Self::ProfileNotFound(_) => "E_PROFILE_NOT_FOUND",
            Self::Ledger(_) => "E_LEDGER",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Ledger(e) if e.retryable())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("{0}")]
    Validation(String),
    #[error("profile not found: {0}")]
    ProfileNotFound(Uuid),
    #[error("plan not found: {0}")]
    PlanNotFound(Uuid),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl ErrorCode for ProfileError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "E_VALIDATION",
            Self::ProfileNotFound(_) => "E_PROFILE_NOT_FOUND",
            Self::PlanNotFound(_) => "E_PLAN_NOT_FOUND",
            Self::Ledger(_) => "E_LEDGER",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Ledger(e) if e.retryable())
    }
}

// =============================================================================
// CREDIT
// =============================================================================

/// Raw credit input. `amount` stays a JSON value so that floats, strings,
/// and negatives are rejected with a validation error instead of a body
/// parse failure.
#[derive(Debug, Clone, Default)]
pub struct CreditRequest {
    pub user_id: Option<Uuid>,
    pub amount: Option<Value>,
    pub description: Option<String>,
    pub request_id: Option<Uuid>,
}

/// Parse a credit amount: a JSON integer strictly greater than zero.
///
/// # Errors
///
/// Returns [`CreditError::Validation`] for anything else.
pub fn parse_amount(raw: Option<&Value>) -> Result<i64, CreditError> {
    let Some(raw) = raw else {
        return Err(CreditError::Validation("missing amount".into()));
    };
    match raw.as_i64() {
        Some(amount) if amount > 0 => Ok(amount),
        _ => Err(CreditError::Validation(format!("amount must be a positive integer, got {raw}"))),
    }
}

/// Credit `amount` tokens to a profile.
///
/// # Errors
///
/// Validation failures, an unknown profile, or a store failure.
pub async fn credit(store: &dyn LedgerStore, request: CreditRequest) -> Result<Profile, CreditError> {
    let Some(user_id) = request.user_id else {
        return Err(CreditError::Validation("missing user_id".into()));
    };
    let amount = parse_amount(request.amount.as_ref())?;
    let description = request
        .description
        .map(|d| d.trim().to_owned())
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| DEFAULT_CREDIT_DESCRIPTION.to_owned());

    let entry = CreditEntry { user_id, amount, description, request_id: request.request_id };
    let outcome = match store.credit(&entry).await {
        Ok(outcome) => outcome,
        Err(LedgerError::RequestIdConflict(request_id)) => {
            return Err(CreditError::Validation(format!(
                "request_id {request_id} is already used by another operation"
            )));
        }
        Err(e) => return Err(e.into()),
    };
    match outcome {
        Some(CreditOutcome::Credited(profile)) => {
            info!(%user_id, amount, balance = profile.token_balance, "ledger: credited");
            Ok(profile)
        }
        Some(CreditOutcome::Duplicate(profile)) => {
            info!(%user_id, request_id = ?entry.request_id, "ledger: duplicate credit ignored");
            Ok(profile)
        }
        None => Err(CreditError::ProfileNotFound(user_id)),
    }
}

// =============================================================================
// PROFILES
// =============================================================================

/// Create the profile on first login, or return the existing one.
///
/// # Errors
///
/// Returns a validation error for an over-long username, or a store failure.
pub async fn ensure_profile(
    store: &dyn LedgerStore,
    user_id: Uuid,
    username: Option<&str>,
    initial_balance: i64,
) -> Result<Profile, ProfileError> {
    let username = username.map(str::trim).filter(|u| !u.is_empty());
    if username.is_some_and(|u| u.chars().count() > MAX_USERNAME_LEN) {
        return Err(ProfileError::Validation(format!("username longer than {MAX_USERNAME_LEN} characters")));
    }
    Ok(store
        .ensure_profile(user_id, username, initial_balance)
        .await?)
}

/// # Errors
///
/// [`ProfileError::ProfileNotFound`] or a store failure.
pub async fn get_profile(store: &dyn LedgerStore, user_id: Uuid) -> Result<Profile, ProfileError> {
    store
        .profile(user_id)
        .await?
        .ok_or(ProfileError::ProfileNotFound(user_id))
}

/// Clamp a requested history page size into `1..=MAX_HISTORY_LIMIT`.
#[must_use]
pub fn history_limit(requested: Option<i64>) -> i64 {
    requested.map_or(DEFAULT_HISTORY_LIMIT, |n| n.clamp(1, MAX_HISTORY_LIMIT))
}

/// Newest-first transaction history for an existing profile.
///
/// # Errors
///
/// [`ProfileError::ProfileNotFound`] or a store failure.
pub async fn history(
    store: &dyn LedgerStore,
    user_id: Uuid,
    limit: Option<i64>,
) -> Result<Vec<Transaction>, ProfileError> {
    get_profile(store, user_id).await?;
    Ok(store
        .transactions(user_id, history_limit(limit))
        .await?)
}

/// # Errors
///
/// Unknown profile or plan, or a store failure.
pub async fn select_plan(store: &dyn LedgerStore, user_id: Uuid, plan_id: Uuid) -> Result<Profile, ProfileError> {
    match store.select_plan(user_id, plan_id).await? {
        PlanSelection::Selected(profile) => {
            info!(%user_id, %plan_id, "ledger: plan selected");
            Ok(profile)
        }
        PlanSelection::UnknownProfile => Err(ProfileError::ProfileNotFound(user_id)),
        PlanSelection::UnknownPlan => Err(ProfileError::PlanNotFound(plan_id)),
    }
}

/// Preferences as sent by a client. A blank `selected_model` clears it.
#[derive(Debug, Clone, Default)]
pub struct SettingsRequest {
    pub selected_model: Option<String>,
    pub settings: Option<Value>,
}

/// Validate a settings request into a store update.
///
/// # Errors
///
/// [`ProfileError::Validation`] when `settings` is not a JSON object or
/// nothing would change.
pub fn preferences_update(request: SettingsRequest) -> Result<PreferencesUpdate, ProfileError> {
    if request.selected_model.is_none() && request.settings.is_none() {
        return Err(ProfileError::Validation("nothing to update".into()));
    }
    if let Some(settings) = &request.settings {
        if !settings.is_object() {
            return Err(ProfileError::Validation("settings must be a JSON object".into()));
        }
    }
    let selected_model = request.selected_model.map(|m| {
        let m = m.trim();
        (!m.is_empty()).then(|| m.to_owned())
    });
    Ok(PreferencesUpdate { selected_model, settings: request.settings })
}

/// # Errors
///
/// Validation failures, an unknown profile, or a store failure.
pub async fn update_settings(
    store: &dyn LedgerStore,
    user_id: Uuid,
    request: SettingsRequest,
) -> Result<Profile, ProfileError> {
    let update = preferences_update(request)?;
    store
        .update_preferences(user_id, &update)
        .await?
        .ok_or(ProfileError::ProfileNotFound(user_id))
}

#[cfg(test)]
#[path = "ledger_test.rs"]
mod tests;
