use chrono::Utc;
use domain::model::AuditSeverity;
use domain::{AppError, AppResult};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

/// §4.M: append-only activity log. Rows are never updated or deleted by
/// operational code (only the idempotency-index retention sweep and this
/// crate's own tables touch `created_at`-indexed history).
#[derive(Clone)]
pub struct AuditLog {
    pool: PgPool,
}

impl AuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn log(&self, user_id: Option<Uuid>, kind: &str, detail: Value) -> AppResult<()> {
        self.insert(user_id, kind, AuditSeverity::Info, detail)
            .await
    }

    /// A failed refund (or any operation that leaves a charge unresolved)
    /// emits an urgent record per the §7 propagation policy; the reaper
    /// re-attempts on its next sweep.
    pub async fn log_urgent(&self, user_id: Option<Uuid>, kind: &str, detail: Value) -> AppResult<()> {
        tracing::error!(kind, user_id = ?user_id, detail = %detail, "urgent audit event");
        self.insert(user_id, kind, AuditSeverity::Urgent, detail)
            .await
    }

    async fn insert(
        &self,
        user_id: Option<Uuid>,
        kind: &str,
        severity: AuditSeverity,
        detail: Value,
    ) -> AppResult<()> {
        let severity_str = serde_json::to_value(severity)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "info".to_string());

        sqlx::query(
            "INSERT INTO activity_log (id, user_id, kind, severity, detail, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(kind)
        .bind(severity_str)
        .bind(detail)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }
}
