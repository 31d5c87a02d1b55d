use domain::model::{Money, ServicePrice};
use domain::{AppError, AppResult};
use sqlx::PgPool;

/// §4.E: lookup of current price per operation kind.
///
/// Prices are immutable per request — the caller snapshots whatever
/// `lookup` returns into the transaction it charges; a price change after
/// that point does not affect an in-flight operation.
#[derive(Clone)]
pub struct ServicePriceRegistry {
    pool: PgPool,
}

impl ServicePriceRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn lookup(&self, service_key: &str) -> AppResult<Money> {
        sqlx::query_scalar("SELECT price FROM service_prices WHERE service_key = $1")
            .bind(service_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
            .ok_or_else(|| AppError::Internal(format!("no price configured for {service_key}")))
    }

    pub async fn list(&self) -> AppResult<Vec<ServicePrice>> {
        let rows: Vec<(String, Money)> =
            sqlx::query_as("SELECT service_key, price FROM service_prices")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(service_key, price)| ServicePrice { service_key, price })
            .collect())
    }

    pub async fn set(&self, service_key: &str, price: Money) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO service_prices (service_key, price) VALUES ($1, $2)
             ON CONFLICT (service_key) DO UPDATE SET price = EXCLUDED.price",
        )
        .bind(service_key)
        .bind(price)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }
}
