//! Ledger store: profiles, balance holds, transactions, and the request log.
//!
//! DESIGN
//! ======
//! Every balance mutation is a single atomic operation owned by the store:
//!
//! - [`LedgerStore::try_hold`] reserves `cost` tokens with one conditional
//!   update ("add to `held_tokens` where `token_balance - held_tokens >= cost`").
//!   Two concurrent relay calls against a balance of 1 cannot both hold.
//! - [`LedgerStore::settle`] turns a hold into a debit, a ledger row, and a
//!   request-log row in one transaction keyed by `request_id`.
//! - [`LedgerStore::credit`] increments the balance and appends the ledger
//!   row in one transaction, optionally keyed by `request_id`.
//!
//! A `request_id` names exactly one operation: one user's chat debit or one
//! user's credit. Reusing it for anything else is a
//! [`LedgerError::RequestIdConflict`] and changes nothing.
//!
//! TRADE-OFFS
//! ==========
//! Holds are released explicitly when the provider call fails. A process
//! crash between hold and settle leaves `held_tokens` raised until an
//! operator clears it; the balance itself is never touched by a hold.

pub mod memory;
pub mod postgres;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::llm::types::Usage;

pub use memory::MemoryLedger;
pub use postgres::PgLedger;

// =============================================================================
// ERROR
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("no active hold of {cost} tokens for user {user_id}")]
    HoldMissing { user_id: Uuid, cost: i64 },
    /// The key is already bound to another user or another kind of operation.
    #[error("request_id {0} is already used by another operation")]
    RequestIdConflict(Uuid),
}

impl crate::error::ErrorCode for LedgerError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Database(_) => "E_DATABASE",
            Self::HoldMissing { .. } => "E_HOLD_MISSING",
            Self::RequestIdConflict(_) => "E_REQUEST_ID_CONFLICT",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

// =============================================================================
// RECORDS
// =============================================================================

/// Per-user balance and preferences. Mirrors the `profiles` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub username: Option<String>,
    pub token_balance: i64,
    /// Tokens reserved by in-flight relay calls.
    pub held_tokens: i64,
    pub selected_model: Option<String>,
    pub selected_plan: Option<Uuid>,
    pub settings: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Profile {
    /// Tokens that a new hold may still claim.
    #[must_use]
    pub fn available(&self) -> i64 {
        self.token_balance - self.held_tokens
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Debit,
    Credit,
}

impl TransactionKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debit => "debit",
            Self::Credit => "credit",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "debit" => Some(Self::Debit),
            "credit" => Some(Self::Credit),
            _ => None,
        }
    }
}

/// Append-only ledger entry. Mirrors the `transactions` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Negative for debits, positive for credits.
    pub amount: i64,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub description: String,
    pub request_id: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Audit record of one relay call. Mirrors the `requests` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestLog {
    pub id: Uuid,
    pub request_id: Uuid,
    pub user_id: Uuid,
    pub ai_type: String,
    pub input: serde_json::Value,
    pub output: String,
    pub cost: i64,
    pub model: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Purchasable plan. Mirrors the `tariffs` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tariff {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub token_limit: i64,
    pub price: i64,
}

// =============================================================================
// OPERATION INPUTS / OUTPUTS
// =============================================================================

/// Everything written when a held relay call completes.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub request_id: Uuid,
    pub user_id: Uuid,
    pub cost: i64,
    pub description: String,
    pub ai_type: String,
    pub input: serde_json::Value,
    pub output: String,
    pub model: String,
    pub usage: Option<Usage>,
}

impl Settlement {
    pub(crate) fn prompt_tokens(&self) -> i64 {
        self.usage
            .map_or(0, |u| i64::try_from(u.prompt_tokens).unwrap_or(i64::MAX))
    }

    pub(crate) fn completion_tokens(&self) -> i64 {
        self.usage
            .map_or(0, |u| i64::try_from(u.completion_tokens).unwrap_or(i64::MAX))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    /// Debit applied; carries the new balance.
    Settled { balance: i64 },
    /// `request_id` was already settled; the hold was released instead.
    AlreadySettled { balance: i64 },
}

impl SettleOutcome {
    #[must_use]
    pub fn balance(self) -> i64 {
        match self {
            Self::Settled { balance } | Self::AlreadySettled { balance } => balance,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreditEntry {
    pub user_id: Uuid,
    pub amount: i64,
    pub description: String,
    pub request_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CreditOutcome {
    Credited(Profile),
    /// `request_id` was already used; no second credit was applied.
    Duplicate(Profile),
}

impl CreditOutcome {
    #[must_use]
    pub fn into_profile(self) -> Profile {
        match self {
            Self::Credited(p) | Self::Duplicate(p) => p,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanSelection {
    Selected(Profile),
    UnknownProfile,
    UnknownPlan,
}

/// Partial preferences update. `selected_model: Some(None)` clears the model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreferencesUpdate {
    pub selected_model: Option<Option<String>>,
    pub settings: Option<serde_json::Value>,
}

// =============================================================================
// STORE TRAIT
// =============================================================================

#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    async fn profile(&self, user_id: Uuid) -> Result<Option<Profile>, LedgerError>;

    /// Create the profile if absent and return it. A positive
    /// `initial_balance` is recorded as a credit transaction.
    async fn ensure_profile(
        &self,
        user_id: Uuid,
        username: Option<&str>,
        initial_balance: i64,
    ) -> Result<Profile, LedgerError>;

    /// Atomically reserve `cost` tokens. Returns `false` when the spendable
    /// balance is too low or the profile does not exist.
    async fn try_hold(&self, user_id: Uuid, cost: i64) -> Result<bool, LedgerError>;

    async fn release_hold(&self, user_id: Uuid, cost: i64) -> Result<(), LedgerError>;

    /// Fails with [`LedgerError::RequestIdConflict`] when the key already
    /// belongs to a credit.
    async fn settle(&self, settlement: &Settlement) -> Result<SettleOutcome, LedgerError>;

    /// Returns `None` when the profile does not exist. A key reused by the
    /// same user's credit is a [`CreditOutcome::Duplicate`]; any other reuse
    /// is a [`LedgerError::RequestIdConflict`].
    async fn credit(&self, entry: &CreditEntry) -> Result<Option<CreditOutcome>, LedgerError>;

    async fn find_request(&self, request_id: Uuid) -> Result<Option<RequestLog>, LedgerError>;

    /// Newest first.
    async fn transactions(&self, user_id: Uuid, limit: i64) -> Result<Vec<Transaction>, LedgerError>;

    async fn tariffs(&self) -> Result<Vec<Tariff>, LedgerError>;

    async fn select_plan(&self, user_id: Uuid, plan_id: Uuid) -> Result<PlanSelection, LedgerError>;

    /// Returns `None` when the profile does not exist.
    async fn update_preferences(
        &self,
        user_id: Uuid,
        update: &PreferencesUpdate,
    ) -> Result<Option<Profile>, LedgerError>;
}

// =============================================================================
// DEFAULT CATALOGUE
// =============================================================================

/// Plans seeded into a fresh store. The Postgres migration inserts the same rows.
#[must_use]
pub fn default_tariffs() -> Vec<Tariff> {
    vec![
        Tariff {
            id: Uuid::from_u128(0x6c1f_0a2e_0001_4000_8000_0000_0000_0001),
            name: "Starter".into(),
            description: "Try Cataleya with a small token pack.".into(),
            token_limit: 100,
            price: 199,
        },
        Tariff {
            id: Uuid::from_u128(0x6c1f_0a2e_0002_4000_8000_0000_0000_0002),
            name: "Pro".into(),
            description: "For daily chat use.".into(),
            token_limit: 1_000,
            price: 990,
        },
        Tariff {
            id: Uuid::from_u128(0x6c1f_0a2e_0003_4000_8000_0000_0000_0003),
            name: "Team".into(),
            description: "Shared budget for small teams.".into(),
            token_limit: 5_000,
            price: 3_990,
        },
    ]
}
