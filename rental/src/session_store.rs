use chrono::{DateTime, Utc};
use domain::model::{Money, RentalSession, RentalTier, SessionStatus};
use domain::{AppError, AppResult};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

fn tier_str(tier: RentalTier) -> &'static str {
    match tier {
        RentalTier::Tier1 => "tier1",
        RentalTier::Tier2 => "tier2",
        RentalTier::Tier3 => "tier3",
        RentalTier::SecondaryPlatform => "secondary_platform",
    }
}

fn status_str(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Waiting => "waiting",
        SessionStatus::Allocated => "allocated",
        SessionStatus::Completed => "completed",
        SessionStatus::Expired => "expired",
        SessionStatus::Failed => "failed",
    }
}

/// §4.H: rental session state-machine records. Every status change goes
/// through `cas_transition`, which enforces spec §5's ordering guarantee —
/// "no two transitions may commit concurrently" — via a `WHERE status = $old`
/// clause rather than an application-level lock.
#[derive(Clone)]
pub struct SessionStore {
    pool: PgPool,
}

impl SessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// §4.I `CREATED -> WAITING`: inserts the row. The wallet charge that
    /// must accompany this is the caller's responsibility (orchestrator),
    /// since it spans a different crate's transaction.
    pub async fn create_waiting(
        &self,
        session_id: &str,
        user_id: Uuid,
        tier: RentalTier,
        carrier: &str,
        cost: Money,
        ttl: std::time::Duration,
    ) -> AppResult<RentalSession> {
        let now = Utc::now();
        let expires_at = now
            + chrono::Duration::from_std(ttl)
                .map_err(|e| AppError::Internal(format!("invalid ttl: {e}")))?;

        sqlx::query(
            "INSERT INTO rental_sessions
                (session_id, user_id, tier, carrier, phone_number, provider_request_id,
                 status, start_at, expires_at, completed_at, otp_code, cost, provider_response)
             VALUES ($1, $2, $3, $4, NULL, NULL, $5, $6, $7, NULL, NULL, $8, $9)",
        )
        .bind(session_id)
        .bind(user_id)
        .bind(tier_str(tier))
        .bind(carrier)
        .bind(status_str(SessionStatus::Waiting))
        .bind(now)
        .bind(expires_at)
        .bind(cost)
        .bind(Value::Null)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        self.get(session_id)
            .await?
            .ok_or_else(|| AppError::Internal("session row vanished after insert".into()))
    }

    pub async fn get(&self, session_id: &str) -> AppResult<Option<RentalSession>> {
        let row: Option<RawRow> = sqlx::query_as(
            "SELECT session_id, user_id, tier, carrier, phone_number, provider_request_id,
                    status, start_at, expires_at, completed_at, otp_code, cost, provider_response
             FROM rental_sessions WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(row.map(RawRow::into_model))
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> AppResult<Vec<RentalSession>> {
        let rows: Vec<RawRow> = sqlx::query_as(
            "SELECT session_id, user_id, tier, carrier, phone_number, provider_request_id,
                    status, start_at, expires_at, completed_at, otp_code, cost, provider_response
             FROM rental_sessions WHERE user_id = $1 ORDER BY start_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(RawRow::into_model).collect())
    }

    /// §4.L: sessions past their deadline without a terminal status.
    pub async fn list_expired(&self, now: DateTime<Utc>) -> AppResult<Vec<RentalSession>> {
        let rows: Vec<RawRow> = sqlx::query_as(
            "SELECT session_id, user_id, tier, carrier, phone_number, provider_request_id,
                    status, start_at, expires_at, completed_at, otp_code, cost, provider_response
             FROM rental_sessions
             WHERE status IN ('waiting', 'allocated') AND expires_at < $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(RawRow::into_model).collect())
    }

    /// Count of WAITING/ALLOCATED sessions for a tier — used to reconcile
    /// the in-memory `GlobalBoundedQueue` against durable state on startup,
    /// and to check invariant 6 in tests.
    pub async fn count_active_for_tier(&self, tier: RentalTier) -> AppResult<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM rental_sessions
             WHERE tier = $1 AND status IN ('waiting', 'allocated')",
        )
        .bind(tier_str(tier))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))
    }

    /// `WAITING -> ALLOCATED`.
    pub async fn allocate(
        &self,
        session_id: &str,
        phone_number: &str,
        provider_request_id: &str,
        provider_response: Value,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE rental_sessions
             SET status = $1, phone_number = $2, provider_request_id = $3, provider_response = $4
             WHERE session_id = $5 AND status = $6",
        )
        .bind(status_str(SessionStatus::Allocated))
        .bind(phone_number)
        .bind(provider_request_id)
        .bind(provider_response)
        .bind(session_id)
        .bind(status_str(SessionStatus::Waiting))
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    /// `ALLOCATED -> COMPLETED`.
    pub async fn complete(&self, session_id: &str, otp_code: &str) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE rental_sessions
             SET status = $1, otp_code = $2, completed_at = $3
             WHERE session_id = $4 AND status = $5",
        )
        .bind(status_str(SessionStatus::Completed))
        .bind(otp_code)
        .bind(Utc::now())
        .bind(session_id)
        .bind(status_str(SessionStatus::Allocated))
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    /// `WAITING -> FAILED` (budget exhausted / insufficient provider balance).
    pub async fn fail(&self, session_id: &str) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE rental_sessions SET status = $1 WHERE session_id = $2 AND status = $3",
        )
        .bind(status_str(SessionStatus::Failed))
        .bind(session_id)
        .bind(status_str(SessionStatus::Waiting))
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    /// `{WAITING, ALLOCATED} -> EXPIRED`, used by the reaper and by the OTP
    /// poll path when the deadline has passed.
    pub async fn expire(&self, session_id: &str) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE rental_sessions SET status = $1
             WHERE session_id = $2 AND status IN ('waiting', 'allocated')",
        )
        .bind(status_str(SessionStatus::Expired))
        .bind(session_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }
}

#[derive(sqlx::FromRow)]
struct RawRow {
    session_id: String,
    user_id: Uuid,
    tier: String,
    carrier: String,
    phone_number: Option<String>,
    provider_request_id: Option<String>,
    status: String,
    start_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    otp_code: Option<String>,
    cost: Money,
    provider_response: Value,
}

impl RawRow {
    fn into_model(self) -> RentalSession {
        RentalSession {
            session_id: self.session_id,
            user_id: self.user_id,
            tier: parse_tier(&self.tier),
            carrier: self.carrier,
            phone_number: self.phone_number,
            provider_request_id: self.provider_request_id,
            status: parse_status(&self.status),
            start_at: self.start_at,
            expires_at: self.expires_at,
            completed_at: self.completed_at,
            otp_code: self.otp_code,
            cost: self.cost,
            provider_response: self.provider_response,
        }
    }
}

fn parse_tier(s: &str) -> RentalTier {
    match s {
        "tier1" => RentalTier::Tier1,
        "tier2" => RentalTier::Tier2,
        "tier3" => RentalTier::Tier3,
        _ => RentalTier::SecondaryPlatform,
    }
}

fn parse_status(s: &str) -> SessionStatus {
    match s {
        "waiting" => SessionStatus::Waiting,
        "allocated" => SessionStatus::Allocated,
        "completed" => SessionStatus::Completed,
        "expired" => SessionStatus::Expired,
        _ => SessionStatus::Failed,
    }
}
