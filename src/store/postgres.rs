//! Postgres ledger store.
//!
//! Holds are single conditional `UPDATE`s; settle and credit each run in one
//! SQL transaction. Idempotency keys are enforced by unique indexes on
//! `requests.request_id` and `transactions.request_id`; a key that collides
//! with a different operation rolls the transaction back.

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{
    CreditEntry, CreditOutcome, LedgerError, LedgerStore, PlanSelection, PreferencesUpdate, Profile, RequestLog,
    SettleOutcome, Settlement, Tariff, Transaction, TransactionKind,
};

const PROFILE_COLUMNS: &str =
    "id, username, token_balance, held_tokens, selected_model, selected_plan, settings, created_at";

#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn profile_from_row(row: &PgRow) -> Result<Profile, sqlx::Error> {
    Ok(Profile {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        token_balance: row.try_get("token_balance")?,
        held_tokens: row.try_get("held_tokens")?,
        selected_model: row.try_get("selected_model")?,
        selected_plan: row.try_get("selected_plan")?,
        settings: row.try_get("settings")?,
        created_at: row.try_get("created_at")?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction, sqlx::Error> {
    let kind: String = row.try_get("kind")?;
    let kind = TransactionKind::parse(&kind).ok_or_else(|| sqlx::Error::ColumnDecode {
        index: "kind".into(),
        source: format!("unknown transaction kind '{kind}'").into(),
    })?;
    Ok(Transaction {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        amount: row.try_get("amount")?,
        kind,
        description: row.try_get("description")?,
        request_id: row.try_get("request_id")?,
        created_at: row.try_get("created_at")?,
    })
}

async fn insert_transaction<'e, E>(
    executor: E,
    user_id: Uuid,
    amount: i64,
    kind: TransactionKind,
    description: &str,
    request_id: Option<Uuid>,
) -> Result<u64, sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    let result = sqlx::query(
        "INSERT INTO transactions (id, user_id, amount, kind, description, request_id)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (request_id) DO NOTHING",
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(amount)
    .bind(kind.as_str())
    .bind(description)
    .bind(request_id)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

#[async_trait::async_trait]
impl LedgerStore for PgLedger {
    async fn profile(&self, user_id: Uuid) -> Result<Option<Profile>, LedgerError> {
        let row = sqlx::query(&format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = $1"))
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(profile_from_row).transpose()?)
    }

    async fn ensure_profile(
        &self,
        user_id: Uuid,
        username: Option<&str>,
        initial_balance: i64,
    ) -> Result<Profile, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            "INSERT INTO profiles (id, username, token_balance)
             VALUES ($1, $2, $3)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(user_id)
        .bind(username)
        .bind(initial_balance)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 1 && initial_balance > 0 {
            insert_transaction(&mut *tx, user_id, initial_balance, TransactionKind::Credit, "Initial balance", None)
                .await?;
        }

        let row = sqlx::query(&format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = $1"))
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await?;
        let profile = profile_from_row(&row)?;
        tx.commit().await?;
        Ok(profile)
    }

    async fn try_hold(&self, user_id: Uuid, cost: i64) -> Result<bool, LedgerError> {
        let result = sqlx::query(
            "UPDATE profiles
             SET held_tokens = held_tokens + $2
             WHERE id = $1 AND token_balance - held_tokens >= $2",
        )
        .bind(user_id)
        .bind(cost)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_hold(&self, user_id: Uuid, cost: i64) -> Result<(), LedgerError> {
        sqlx::query("UPDATE profiles SET held_tokens = GREATEST(held_tokens - $2, 0) WHERE id = $1")
            .bind(user_id)
            .bind(cost)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn settle(&self, settlement: &Settlement) -> Result<SettleOutcome, LedgerError> {
        let user_id = settlement.user_id;
        let cost = settlement.cost;
        let mut tx = self.pool.begin().await?;

        // Claim the idempotency key first; a conflict means an earlier attempt settled.
        let claimed = sqlx::query(
            "INSERT INTO requests
                 (id, request_id, user_id, ai_type, input, output, cost, model, prompt_tokens, completion_tokens)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (request_id) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(settlement.request_id)
        .bind(user_id)
        .bind(&settlement.ai_type)
        .bind(&settlement.input)
        .bind(&settlement.output)
        .bind(cost)
        .bind(&settlement.model)
        .bind(settlement.prompt_tokens())
        .bind(settlement.completion_tokens())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if claimed == 0 {
            let balance: Option<i64> = sqlx::query_scalar(
                "UPDATE profiles SET held_tokens = GREATEST(held_tokens - $2, 0)
                 WHERE id = $1
                 RETURNING token_balance",
            )
            .bind(user_id)
            .bind(cost)
            .fetch_optional(&mut *tx)
            .await?;
            let Some(balance) = balance else {
                return Err(LedgerError::HoldMissing { user_id, cost });
            };
            tx.commit().await?;
            return Ok(SettleOutcome::AlreadySettled { balance });
        }

        let balance: Option<i64> = sqlx::query_scalar(
            "UPDATE profiles
             SET token_balance = token_balance - $2, held_tokens = held_tokens - $2
             WHERE id = $1 AND held_tokens >= $2 AND token_balance >= $2
             RETURNING token_balance",
        )
        .bind(user_id)
        .bind(cost)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(balance) = balance else {
            return Err(LedgerError::HoldMissing { user_id, cost });
        };

        let appended = insert_transaction(
            &mut *tx,
            user_id,
            -cost,
            TransactionKind::Debit,
            &settlement.description,
            Some(settlement.request_id),
        )
        .await?;
        if appended == 0 {
            // Dropping `tx` rolls back the request log and the debit.
            return Err(LedgerError::RequestIdConflict(settlement.request_id));
        }

        tx.commit().await?;
        Ok(SettleOutcome::Settled { balance })
    }

    async fn credit(&self, entry: &CreditEntry) -> Result<Option<CreditOutcome>, LedgerError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = $1 FOR UPDATE"))
            .bind(entry.user_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let appended = insert_transaction(
            &mut *tx,
            entry.user_id,
            entry.amount,
            TransactionKind::Credit,
            &entry.description,
            entry.request_id,
        )
        .await?;
        if let (0, Some(request_id)) = (appended, entry.request_id) {
            let owner: Option<(Uuid, String)> =
                sqlx::query_as("SELECT user_id, kind FROM transactions WHERE request_id = $1")
                    .bind(request_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            let same_credit = owner.is_some_and(|(user_id, kind)| {
                user_id == entry.user_id && TransactionKind::parse(&kind) == Some(TransactionKind::Credit)
            });
            if !same_credit {
                return Err(LedgerError::RequestIdConflict(request_id));
            }
            let profile = profile_from_row(&row)?;
            tx.commit().await?;
            return Ok(Some(CreditOutcome::Duplicate(profile)));
        }

        let row = sqlx::query(&format!(
            "UPDATE profiles SET token_balance = token_balance + $2 WHERE id = $1 RETURNING {PROFILE_COLUMNS}"
        ))
        .bind(entry.user_id)
        .bind(entry.amount)
        .fetch_one(&mut *tx)
        .await?;
        let profile = profile_from_row(&row)?;
        tx.commit().await?;
        Ok(Some(CreditOutcome::Credited(profile)))
    }

    async fn find_request(&self, request_id: Uuid) -> Result<Option<RequestLog>, LedgerError> {
        let row = sqlx::query(
            "SELECT id, request_id, user_id, ai_type, input, output, cost, model,
                    prompt_tokens, completion_tokens, created_at
             FROM requests WHERE request_id = $1",
        )
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(RequestLog {
            id: row.try_get("id")?,
            request_id: row.try_get("request_id")?,
            user_id: row.try_get("user_id")?,
            ai_type: row.try_get("ai_type")?,
            input: row.try_get("input")?,
            output: row.try_get("output")?,
            cost: row.try_get("cost")?,
            model: row.try_get("model")?,
            prompt_tokens: row.try_get("prompt_tokens")?,
            completion_tokens: row.try_get("completion_tokens")?,
            created_at: row.try_get("created_at")?,
        }))
    }

    async fn transactions(&self, user_id: Uuid, limit: i64) -> Result<Vec<Transaction>, LedgerError> {
        let rows = sqlx::query(
            "SELECT id, user_id, amount, kind, description, request_id, created_at
             FROM transactions
             WHERE user_id = $1
             ORDER BY created_at DESC, seq DESC
             LIMIT $2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(transaction_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn tariffs(&self) -> Result<Vec<Tariff>, LedgerError> {
        let rows = sqlx::query_as::<_, (Uuid, String, String, i64, i64)>(
            "SELECT id, name, description, token_limit, price FROM tariffs ORDER BY price, name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, name, description, token_limit, price)| Tariff { id, name, description, token_limit, price })
            .collect())
    }

    async fn select_plan(&self, user_id: Uuid, plan_id: Uuid) -> Result<PlanSelection, LedgerError> {
        let plan_exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM tariffs WHERE id = $1)")
            .bind(plan_id)
            .fetch_one(&self.pool)
            .await?;
        if !plan_exists {
            return Ok(PlanSelection::UnknownPlan);
        }
        let row = sqlx::query(&format!(
            "UPDATE profiles SET selected_plan = $2 WHERE id = $1 RETURNING {PROFILE_COLUMNS}"
        ))
        .bind(user_id)
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(PlanSelection::Selected(profile_from_row(&row)?)),
            None => Ok(PlanSelection::UnknownProfile),
        }
    }

    async fn update_preferences(
        &self,
        user_id: Uuid,
        update: &PreferencesUpdate,
    ) -> Result<Option<Profile>, LedgerError> {
        let row = sqlx::query(&format!(
            "UPDATE profiles
             SET selected_model = CASE WHEN $2 THEN $3 ELSE selected_model END,
                 settings = COALESCE($4, settings)
             WHERE id = $1
             RETURNING {PROFILE_COLUMNS}"
        ))
        .bind(user_id)
        .bind(update.selected_model.is_some())
        .bind(update.selected_model.clone().flatten())
        .bind(update.settings.as_ref())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(profile_from_row).transpose()?)
    }
}

#[cfg(test)]
#[path = "postgres_test.rs"]
mod tests;
