use chrono::{Duration as ChronoDuration, Utc};
use domain::{AppError, AppResult};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

/// §4.D: reference string -> prior transaction outcome.
///
/// Reads are side-effect-free; writes happen inside the same DB transaction
/// as the ledger write that produced them (see `wallet::ledger`), never on
/// their own.
pub struct IdempotencyIndex;

#[derive(Debug, Clone)]
pub struct PriorOutcome {
    pub transaction_id: Uuid,
    pub result_fingerprint: String,
}

impl IdempotencyIndex {
    pub async fn lookup(
        tx: &mut Transaction<'_, Postgres>,
        reference: &str,
    ) -> AppResult<Option<PriorOutcome>> {
        let row = sqlx::query_as::<_, (Uuid, String)>(
            "SELECT transaction_id, result_fingerprint FROM idempotency_index WHERE key = $1",
        )
        .bind(reference)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(row.map(|(transaction_id, result_fingerprint)| PriorOutcome {
            transaction_id,
            result_fingerprint,
        }))
    }

    /// Writes the idempotency row. MUST be called in the same DB transaction
    /// that inserts the corresponding ledger row so both commit together.
    pub async fn record(
        tx: &mut Transaction<'_, Postgres>,
        reference: &str,
        transaction_id: Uuid,
        result_fingerprint: &str,
    ) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO idempotency_index (key, transaction_id, result_fingerprint, created_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(reference)
        .bind(transaction_id)
        .bind(result_fingerprint)
        .bind(Utc::now())
        .execute(&mut **tx)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }

    /// §4.D retention sweep: drop idempotency rows older than `retention`.
    /// Invoked from the same periodic task as the reaper (see SPEC_FULL §C).
    pub async fn purge_older_than(
        pool: &sqlx::PgPool,
        retention: std::time::Duration,
    ) -> AppResult<u64> {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(retention)
                .map_err(|e| AppError::Internal(format!("invalid retention duration: {e}")))?;

        let result = sqlx::query("DELETE FROM idempotency_index WHERE created_at < $1")
            .bind(cutoff)
            .execute(pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }
}
