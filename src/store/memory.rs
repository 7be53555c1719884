//! In-memory ledger store.
//!
//! Used when `DATABASE_URL` is unset (local runs) and as the store double in
//! tests. Each trait operation runs inside one critical section, so holds,
//! settlements, and credits are atomic with respect to each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    CreditEntry, CreditOutcome, LedgerError, LedgerStore, PlanSelection, PreferencesUpdate, Profile, RequestLog,
    SettleOutcome, Settlement, Tariff, Transaction, TransactionKind, default_tariffs,
};

#[derive(Clone)]
pub struct MemoryLedger {
    inner: Arc<Mutex<MemoryInner>>,
}

#[derive(Default)]
struct MemoryInner {
    profiles: HashMap<Uuid, Profile>,
    /// Insertion order doubles as creation order.
    transactions: Vec<Transaction>,
    requests: HashMap<Uuid, RequestLog>,
    tariffs: Vec<Tariff>,
}

impl MemoryInner {
    fn key_in_use(&self, request_id: Uuid) -> bool {
        self.requests.contains_key(&request_id)
            || self
                .transactions
                .iter()
                .any(|t| t.request_id == Some(request_id))
    }
}

impl MemoryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::with_tariffs(default_tariffs())
    }

    #[must_use]
    pub fn with_tariffs(tariffs: Vec<Tariff>) -> Self {
        Self { inner: Arc::new(Mutex::new(MemoryInner { tariffs, ..MemoryInner::default() })) }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Insert or replace a profile with an explicit balance, bypassing the ledger.
    pub fn seed_profile(&self, user_id: Uuid, token_balance: i64) -> Profile {
        let profile = new_profile(user_id, None, token_balance);
        self.lock().profiles.insert(user_id, profile.clone());
        profile
    }

    /// Number of request-log rows written so far.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

fn new_profile(user_id: Uuid, username: Option<&str>, token_balance: i64) -> Profile {
    Profile {
        id: user_id,
        username: username.map(str::to_owned),
        token_balance,
        held_tokens: 0,
        selected_model: None,
        selected_plan: None,
        settings: serde_json::json!({}),
        created_at: OffsetDateTime::now_utc(),
    }
}

fn ledger_row(user_id: Uuid, amount: i64, kind: TransactionKind, description: &str, request_id: Option<Uuid>) -> Transaction {
    Transaction {
        id: Uuid::new_v4(),
        user_id,
        amount,
        kind,
        description: description.to_owned(),
        request_id,
        created_at: OffsetDateTime::now_utc(),
    }
}

#[async_trait::async_trait]
impl LedgerStore for MemoryLedger {
    async fn profile(&self, user_id: Uuid) -> Result<Option<Profile>, LedgerError> {
        Ok(self.lock().profiles.get(&user_id).cloned())
    }

    async fn ensure_profile(
        &self,
        user_id: Uuid,
        username: Option<&str>,
        initial_balance: i64,
    ) -> Result<Profile, LedgerError> {
        let mut inner = self.lock();
        if let Some(existing) = inner.profiles.get(&user_id) {
            return Ok(existing.clone());
        }
        let profile = new_profile(user_id, username, initial_balance);
        inner.profiles.insert(user_id, profile.clone());
        if initial_balance > 0 {
            let row = ledger_row(user_id, initial_balance, TransactionKind::Credit, "Initial balance", None);
            inner.transactions.push(row);
        }
        Ok(profile)
    }

    async fn try_hold(&self, user_id: Uuid, cost: i64) -> Result<bool, LedgerError> {
        let mut inner = self.lock();
        let Some(profile) = inner.profiles.get_mut(&user_id) else {
            return Ok(false);
        };
        if profile.available() < cost {
            return Ok(false);
        }
        profile.held_tokens += cost;
        Ok(true)
    }

    async fn release_hold(&self, user_id: Uuid, cost: i64) -> Result<(), LedgerError> {
        if let Some(profile) = self.lock().profiles.get_mut(&user_id) {
            profile.held_tokens = (profile.held_tokens - cost).max(0);
        }
        Ok(())
    }

    async fn settle(&self, settlement: &Settlement) -> Result<SettleOutcome, LedgerError> {
        let mut inner = self.lock();
        let user_id = settlement.user_id;
        let cost = settlement.cost;
        let already_settled = inner.requests.contains_key(&settlement.request_id);
        if !already_settled && inner.key_in_use(settlement.request_id) {
            return Err(LedgerError::RequestIdConflict(settlement.request_id));
        }

        let Some(profile) = inner.profiles.get_mut(&user_id) else {
            return Err(LedgerError::HoldMissing { user_id, cost });
        };
        if already_settled {
            profile.held_tokens = (profile.held_tokens - cost).max(0);
            return Ok(SettleOutcome::AlreadySettled { balance: profile.token_balance });
        }
        if profile.held_tokens < cost || profile.token_balance < cost {
            return Err(LedgerError::HoldMissing { user_id, cost });
        }
        profile.held_tokens -= cost;
        profile.token_balance -= cost;
        let balance = profile.token_balance;

        let row = ledger_row(
            user_id,
            -cost,
            TransactionKind::Debit,
            &settlement.description,
            Some(settlement.request_id),
        );
        inner.transactions.push(row);
        inner.requests.insert(
            settlement.request_id,
            RequestLog {
                id: Uuid::new_v4(),
                request_id: settlement.request_id,
                user_id,
                ai_type: settlement.ai_type.clone(),
                input: settlement.input.clone(),
                output: settlement.output.clone(),
                cost,
                model: settlement.model.clone(),
                prompt_tokens: settlement.prompt_tokens(),
                completion_tokens: settlement.completion_tokens(),
                created_at: OffsetDateTime::now_utc(),
            },
        );
        Ok(SettleOutcome::Settled { balance })
    }

    async fn credit(&self, entry: &CreditEntry) -> Result<Option<CreditOutcome>, LedgerError> {
        let mut inner = self.lock();
        if !inner.profiles.contains_key(&entry.user_id) {
            return Ok(None);
        }
        let mut duplicate = false;
        if let Some(rid) = entry.request_id {
            let owner = inner
                .transactions
                .iter()
                .find(|t| t.request_id == Some(rid))
                .map(|t| (t.user_id, t.kind));
            match owner {
                Some((user_id, TransactionKind::Credit)) if user_id == entry.user_id => duplicate = true,
                Some(_) => return Err(LedgerError::RequestIdConflict(rid)),
                None if inner.requests.contains_key(&rid) => return Err(LedgerError::RequestIdConflict(rid)),
                None => {}
            }
        }
        let Some(profile) = inner.profiles.get_mut(&entry.user_id) else {
            return Ok(None);
        };
        if duplicate {
            return Ok(Some(CreditOutcome::Duplicate(profile.clone())));
        }
        profile.token_balance += entry.amount;
        let updated = profile.clone();
        let row = ledger_row(
            entry.user_id,
            entry.amount,
            TransactionKind::Credit,
            &entry.description,
            entry.request_id,
        );
        inner.transactions.push(row);
        Ok(Some(CreditOutcome::Credited(updated)))
    }

    async fn find_request(&self, request_id: Uuid) -> Result<Option<RequestLog>, LedgerError> {
        Ok(self.lock().requests.get(&request_id).cloned())
    }

    async fn transactions(&self, user_id: Uuid, limit: i64) -> Result<Vec<Transaction>, LedgerError> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .lock()
            .transactions
            .iter()
            .rev()
            .filter(|t| t.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn tariffs(&self) -> Result<Vec<Tariff>, LedgerError> {
        let mut tariffs = self.lock().tariffs.clone();
        tariffs.sort_by(|a, b| a.price.cmp(&b.price).then_with(|| a.name.cmp(&b.name)));
        Ok(tariffs)
    }

    async fn select_plan(&self, user_id: Uuid, plan_id: Uuid) -> Result<PlanSelection, LedgerError> {
        let mut inner = self.lock();
        if !inner.tariffs.iter().any(|t| t.id == plan_id) {
            return Ok(PlanSelection::UnknownPlan);
        }
        let Some(profile) = inner.profiles.get_mut(&user_id) else {
            return Ok(PlanSelection::UnknownProfile);
        };
        profile.selected_plan = Some(plan_id);
        Ok(PlanSelection::Selected(profile.clone()))
    }

    async fn update_preferences(
        &self,
        user_id: Uuid,
        update: &PreferencesUpdate,
    ) -> Result<Option<Profile>, LedgerError> {
        let mut inner = self.lock();
        let Some(profile) = inner.profiles.get_mut(&user_id) else {
            return Ok(None);
        };
        if let Some(model) = &update.selected_model {
            profile.selected_model.clone_from(model);
        }
        if let Some(settings) = &update.settings {
            profile.settings = settings.clone();
        }
        Ok(Some(profile.clone()))
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
