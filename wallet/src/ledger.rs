use crate::idempotency::IdempotencyIndex;
use chrono::Utc;
use domain::model::{Money, TransactionStatus, TransactionType};
use domain::{AppError, AppResult};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

/// §4.C: atomic charge/refund/adminAdjust primitives.
///
/// Each primitive runs inside a single `sqlx` transaction that (a) takes a
/// row lock on the user via `SELECT ... FOR UPDATE`, (b) validates balance,
/// (c) inserts the transaction row, (d) updates the balance, (e) writes the
/// idempotency row — all committed together, satisfying invariant 2
/// (ledger consistency) and invariant 3 (idempotency) of spec §8.
///
/// Concurrent callers targeting the same user serialize on the row lock
/// (spec §5: "wallet operations MUST be serialized per user"); callers for
/// different users proceed independently.
#[derive(Clone)]
pub struct WalletLedger {
    pool: PgPool,
}

#[derive(Debug, Clone)]
pub enum LedgerOutcome {
    Completed {
        transaction_id: Uuid,
        balance_after: Money,
    },
    /// `reference` was already present; no new side effect occurred.
    Duplicate {
        transaction_id: Uuid,
        balance_after: Money,
    },
}

impl WalletLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn charge(
        &self,
        user_id: Uuid,
        amount: Money,
        reference: Option<&str>,
        description: &str,
        kind: TransactionType,
        metadata: Value,
    ) -> AppResult<LedgerOutcome> {
        if amount <= 0 {
            return Err(AppError::Validation(
                "charge amount must be positive".into(),
            ));
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if let Some(reference) = reference {
            if let Some(prior) = IdempotencyIndex::lookup(&mut tx, reference).await? {
                tx.commit()
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))?;
                let balance_after: Money = prior
                    .result_fingerprint
                    .parse()
                    .map_err(|_| AppError::Internal("corrupt idempotency fingerprint".into()))?;
                return Ok(LedgerOutcome::Duplicate {
                    transaction_id: prior.transaction_id,
                    balance_after,
                });
            }
        }

        let balance_before: Money =
            sqlx::query_scalar("SELECT balance FROM users WHERE id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| AppError::Database(e.to_string()))?
                .ok_or_else(|| AppError::NotFound(format!("user {user_id}")))?;

        if balance_before < amount {
            // No side effect: the transaction rolls back on drop.
            return Err(AppError::InsufficientFunds {
                balance: balance_before,
                amount,
            });
        }

        let balance_after = balance_before - amount;

        let transaction_id = self
            .insert_transaction_row(
                &mut tx,
                user_id,
                kind,
                -amount,
                reference,
                description,
                balance_before,
                balance_after,
                metadata,
            )
            .await?;

        sqlx::query("UPDATE users SET balance = $1 WHERE id = $2")
            .bind(balance_after)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if let Some(reference) = reference {
            IdempotencyIndex::record(
                &mut tx,
                reference,
                transaction_id,
                &balance_after.to_string(),
            )
            .await?;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(LedgerOutcome::Completed {
            transaction_id,
            balance_after,
        })
    }

    /// §4.C: refund never checks balance — balance can only increase.
    pub async fn refund(
        &self,
        user_id: Uuid,
        amount: Money,
        reference: Option<&str>,
        description: &str,
        kind: TransactionType,
        metadata: Value,
    ) -> AppResult<LedgerOutcome> {
        if amount <= 0 {
            return Err(AppError::Validation(
                "refund amount must be positive".into(),
            ));
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if let Some(reference) = reference {
            if let Some(prior) = IdempotencyIndex::lookup(&mut tx, reference).await? {
                tx.commit()
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))?;
                let balance_after: Money = prior
                    .result_fingerprint
                    .parse()
                    .map_err(|_| AppError::Internal("corrupt idempotency fingerprint".into()))?;
                return Ok(LedgerOutcome::Duplicate {
                    transaction_id: prior.transaction_id,
                    balance_after,
                });
            }
        }

        let balance_before: Money =
            sqlx::query_scalar("SELECT balance FROM users WHERE id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| AppError::Database(e.to_string()))?
                .ok_or_else(|| AppError::NotFound(format!("user {user_id}")))?;

        let balance_after = balance_before + amount;

        let transaction_id = self
            .insert_transaction_row(
                &mut tx,
                user_id,
                kind,
                amount,
                reference,
                description,
                balance_before,
                balance_after,
                metadata,
            )
            .await?;

        sqlx::query("UPDATE users SET balance = $1 WHERE id = $2")
            .bind(balance_after)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if let Some(reference) = reference {
            IdempotencyIndex::record(
                &mut tx,
                reference,
                transaction_id,
                &balance_after.to_string(),
            )
            .await?;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        tracing::info!(
            user_id = %user_id,
            amount,
            reference,
            transaction_id = %transaction_id,
            "refund committed"
        );

        Ok(LedgerOutcome::Completed {
            transaction_id,
            balance_after,
        })
    }

    /// Signed adjustment by an operator; bypasses balance checks on either side
    /// (an admin may both credit and debit).
    pub async fn admin_adjust(
        &self,
        user_id: Uuid,
        signed_amount: Money,
        reason: &str,
        operator_id: Uuid,
    ) -> AppResult<LedgerOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let balance_before: Money =
            sqlx::query_scalar("SELECT balance FROM users WHERE id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| AppError::Database(e.to_string()))?
                .ok_or_else(|| AppError::NotFound(format!("user {user_id}")))?;

        let balance_after = balance_before + signed_amount;
        if balance_after < 0 {
            return Err(AppError::InsufficientFunds {
                balance: balance_before,
                amount: -signed_amount,
            });
        }

        let metadata = serde_json::json!({ "operator_id": operator_id, "reason": reason });
        let transaction_id = self
            .insert_transaction_row(
                &mut tx,
                user_id,
                TransactionType::AdminAdjust,
                signed_amount,
                None,
                reason,
                balance_before,
                balance_after,
                metadata,
            )
            .await?;

        sqlx::query("UPDATE users SET balance = $1 WHERE id = $2")
            .bind(balance_after)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        tracing::info!(
            user_id = %user_id,
            signed_amount,
            operator_id = %operator_id,
            transaction_id = %transaction_id,
            "admin adjustment committed"
        );

        Ok(LedgerOutcome::Completed {
            transaction_id,
            balance_after,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_transaction_row(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        user_id: Uuid,
        kind: TransactionType,
        signed_amount: Money,
        reference: Option<&str>,
        description: &str,
        balance_before: Money,
        balance_after: Money,
        metadata: Value,
    ) -> AppResult<Uuid> {
        let transaction_id = Uuid::new_v4();
        let kind_str = serde_json::to_value(kind)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string());

        sqlx::query(
            "INSERT INTO transactions
                (id, user_id, kind, amount, reference, status, balance_before, balance_after, created_at, description, metadata)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(transaction_id)
        .bind(user_id)
        .bind(kind_str)
        .bind(signed_amount)
        .bind(reference)
        .bind(serde_json::to_value(TransactionStatus::Completed).unwrap().as_str().unwrap())
        .bind(balance_before)
        .bind(balance_after)
        .bind(Utc::now())
        .bind(description)
        .bind(metadata)
        .execute(&mut **tx)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(transaction_id)
    }
}
