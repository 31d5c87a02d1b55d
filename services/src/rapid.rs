use chrono::{DateTime, Duration as ChronoDuration, Utc};
use domain::config::RapidConfig;
use domain::model::{reference, Money, RapidCheck, RapidOrder, TransactionType};
use domain::{AppError, AppResult};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;
use wallet::audit::AuditLog;
use wallet::ledger::WalletLedger;
use wallet::prices::ServicePriceRegistry;

use upstream::{CallOptions, HttpClient, UpstreamRequest};

fn fingerprint(cookie: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(cookie.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn preview(cookie: &str) -> String {
    cookie.chars().take(12).collect::<String>() + "…"
}

/// §4.K: persisted dedup-cacheable lookups.
#[derive(Clone)]
pub struct RapidStore {
    pool: PgPool,
}

impl RapidStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Dedup: a successful check for (user, cookie) within the window is
    /// reused at no charge (spec §4.K step 1 / invariant in §3).
    pub async fn find_recent_success(
        &self,
        user_id: Uuid,
        cookie_fingerprint: &str,
        window: std::time::Duration,
    ) -> AppResult<Option<RapidCheck>> {
        let since = Utc::now()
            - ChronoDuration::from_std(window).map_err(|e| AppError::Internal(e.to_string()))?;

        let row: Option<RawRow> = sqlx::query_as(
            "SELECT id, user_id, cookie_preview, cookie_fingerprint, status, driver_phone,
                    driver_name, vehicle_plate, orders, created_at, charge_transaction_id,
                    refund_transaction_id
             FROM rapid_checks
             WHERE user_id = $1 AND cookie_fingerprint = $2 AND status = true
                   AND driver_phone IS NOT NULL AND created_at > $3
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(user_id)
        .bind(cookie_fingerprint)
        .bind(since)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(row.map(RawRow::into_model))
    }

    async fn create(
        &self,
        id: Uuid,
        user_id: Uuid,
        cookie_preview: &str,
        cookie_fingerprint: &str,
        charge_transaction_id: Uuid,
    ) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO rapid_checks
                (id, user_id, cookie_preview, cookie_fingerprint, status, driver_phone,
                 driver_name, vehicle_plate, orders, created_at, charge_transaction_id,
                 refund_transaction_id)
             VALUES ($1, $2, $3, $4, false, NULL, NULL, NULL, $5, $6, $7, NULL)",
        )
        .bind(id)
        .bind(user_id)
        .bind(cookie_preview)
        .bind(cookie_fingerprint)
        .bind(serde_json::json!([]))
        .bind(Utc::now())
        .bind(charge_transaction_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn finalize(
        &self,
        id: Uuid,
        status: bool,
        driver_phone: Option<&str>,
        driver_name: Option<&str>,
        vehicle_plate: Option<&str>,
        orders: &[RapidOrder],
        refund_transaction_id: Option<Uuid>,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE rapid_checks
             SET status = $1, driver_phone = $2, driver_name = $3, vehicle_plate = $4,
                 orders = $5, refund_transaction_id = $6
             WHERE id = $7",
        )
        .bind(status)
        .bind(driver_phone)
        .bind(driver_name)
        .bind(vehicle_plate)
        .bind(serde_json::to_value(orders).unwrap_or_default())
        .bind(refund_transaction_id)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> AppResult<Option<RapidCheck>> {
        let row: Option<RawRow> = sqlx::query_as(
            "SELECT id, user_id, cookie_preview, cookie_fingerprint, status, driver_phone,
                    driver_name, vehicle_plate, orders, created_at, charge_transaction_id,
                    refund_transaction_id
             FROM rapid_checks WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(row.map(RawRow::into_model))
    }
}

#[derive(sqlx::FromRow)]
struct RawRow {
    id: Uuid,
    user_id: Uuid,
    cookie_preview: String,
    cookie_fingerprint: String,
    status: bool,
    driver_phone: Option<String>,
    driver_name: Option<String>,
    vehicle_plate: Option<String>,
    orders: Value,
    created_at: DateTime<Utc>,
    charge_transaction_id: Uuid,
    refund_transaction_id: Option<Uuid>,
}

impl RawRow {
    fn into_model(self) -> RapidCheck {
        RapidCheck {
            id: self.id,
            user_id: self.user_id,
            cookie_preview: self.cookie_preview,
            cookie_fingerprint: self.cookie_fingerprint,
            status: self.status,
            driver_phone: self.driver_phone,
            driver_name: self.driver_name,
            vehicle_plate: self.vehicle_plate,
            orders: serde_json::from_value(self.orders).unwrap_or_default(),
            created_at: self.created_at,
            charge_transaction_id: self.charge_transaction_id,
            refund_transaction_id: self.refund_transaction_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RapidOutcome {
    pub check: RapidCheck,
    pub charged: bool,
    pub amount_charged: Money,
    pub is_from_history: bool,
}

pub struct RapidLookup {
    wallet: WalletLedger,
    prices: ServicePriceRegistry,
    store: RapidStore,
    http: HttpClient,
    config: RapidConfig,
    list_url: String,
    detail_url_template: String,
}

impl RapidLookup {
    pub fn new(
        wallet: WalletLedger,
        prices: ServicePriceRegistry,
        store: RapidStore,
        http: HttpClient,
        config: RapidConfig,
        list_url: String,
        detail_url_template: String,
    ) -> Self {
        Self {
            wallet,
            prices,
            store,
            http,
            config,
            list_url,
            detail_url_template,
        }
    }

    /// §4.K: dedup-then-lookup-then-conditionally-charge.
    pub async fn check(&self, user_id: Uuid, cookie: &str) -> AppResult<RapidOutcome> {
        let cookie_fp = fingerprint(cookie);

        if let Some(existing) = self
            .store
            .find_recent_success(user_id, &cookie_fp, self.config.dedup_window)
            .await?
        {
            return Ok(RapidOutcome {
                check: existing,
                charged: false,
                amount_charged: 0,
                is_from_history: true,
            });
        }

        let price = self.prices.lookup("rapid.check").await?;
        let check_id = Uuid::new_v4();
        let reference = reference::rapid_charge(&check_id.to_string());

        let outcome = self
            .wallet
            .charge(
                user_id,
                price,
                Some(&reference),
                "rapid shipper lookup",
                TransactionType::RapidCharge,
                serde_json::json!({ "check_id": check_id }),
            )
            .await?;

        let charge_transaction_id = match outcome {
            wallet::LedgerOutcome::Completed { transaction_id, .. } => transaction_id,
            wallet::LedgerOutcome::Duplicate { transaction_id, .. } => transaction_id,
        };

        self.store
            .create(check_id, user_id, &preview(cookie), &cookie_fp, charge_transaction_id)
            .await?;

        match self.fetch_and_enrich(cookie).await {
            Ok(orders) => {
                let shipper = orders.iter().find(|o| o.driver_phone.is_some());

                if let Some(shipper) = shipper {
                    self.store
                        .finalize(
                            check_id,
                            true,
                            shipper.driver_phone.as_deref(),
                            shipper.driver_name.as_deref(),
                            shipper.vehicle_plate.as_deref(),
                            &orders,
                            None,
                        )
                        .await?;

                    let check = self
                        .store
                        .get(check_id)
                        .await?
                        .ok_or_else(|| AppError::Internal("rapid check vanished".into()))?;

                    Ok(RapidOutcome {
                        check,
                        charged: true,
                        amount_charged: price,
                        is_from_history: false,
                    })
                } else {
                    let refund_transaction_id =
                        self.refund(user_id, check_id, price).await;
                    self.store
                        .finalize(check_id, false, None, None, None, &orders, refund_transaction_id)
                        .await?;

                    let check = self
                        .store
                        .get(check_id)
                        .await?
                        .ok_or_else(|| AppError::Internal("rapid check vanished".into()))?;

                    Ok(RapidOutcome {
                        check,
                        charged: false,
                        amount_charged: 0,
                        is_from_history: false,
                    })
                }
            }
            Err(AppError::CookieExpired) => {
                // Step 5: surface CookieExpired to the caller, but still
                // refund first since no shipper was (or can now be) found.
                let refund_transaction_id = self.refund(user_id, check_id, price).await;
                self.store
                    .finalize(check_id, false, None, None, None, &[], refund_transaction_id)
                    .await?;
                Err(AppError::CookieExpired)
            }
            Err(other) => Err(other),
        }
    }

    async fn refund(&self, user_id: Uuid, check_id: Uuid, price: Money) -> Option<Uuid> {
        let reference = reference::rapid_refund(&check_id.to_string());
        match self
            .wallet
            .refund(
                user_id,
                price,
                Some(&reference),
                "rapid shipper lookup found nothing",
                TransactionType::Refund,
                serde_json::json!({ "check_id": check_id }),
            )
            .await
        {
            Ok(wallet::LedgerOutcome::Completed { transaction_id, .. })
            | Ok(wallet::LedgerOutcome::Duplicate { transaction_id, .. }) => Some(transaction_id),
            Err(err) => {
                tracing::error!(check_id = %check_id, error = %err, "rapid-check refund failed");
                None
            }
        }
    }

    async fn fetch_and_enrich(&self, cookie: &str) -> AppResult<Vec<RapidOrder>> {
        let list_req = UpstreamRequest::get(format!(
            "{}?limit={}",
            self.list_url, self.config.order_list_limit
        ))
        .with_header("Cookie", cookie.to_string());

        let list_resp = self.http.call(list_req, CallOptions::default()).await?;

        let order_ids: Vec<(String, Option<i64>)> = list_resp
            .body
            .get("data")
            .and_then(|d| d.get("order_data"))
            .and_then(|d| d.get("details_list"))
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| {
                        let card = entry.get("info_card")?;
                        let order_id = card.get("order_id")?.as_str()?.to_string();
                        let final_total = card.get("final_total").and_then(Value::as_i64);
                        Some((order_id, final_total))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut orders = Vec::with_capacity(order_ids.len());
        for (order_id, final_total) in order_ids {
            let detail_req = UpstreamRequest::get(
                self.detail_url_template.replace("{order_id}", &order_id),
            )
            .with_header("Cookie", cookie.to_string());

            let detail_resp = self.http.call(detail_req, CallOptions::default()).await?;
            let (driver_phone, driver_name, vehicle_plate) = extract_shipper(&detail_resp.body);

            orders.push(RapidOrder {
                order_id,
                final_total,
                driver_phone,
                driver_name,
                vehicle_plate,
            });
        }

        Ok(orders)
    }
}

/// Opportunistically mine driver/vehicle fields from whichever of the
/// platform's several response subtrees carries them (spec §4.K step 3).
fn extract_shipper(body: &Value) -> (Option<String>, Option<String>, Option<String>) {
    let data = body.get("data");
    let subtrees = ["shipping", "tracking_info", "delivery_info", "driver_info"];

    for key in subtrees {
        let Some(sub) = data.and_then(|d| d.get(key)) else {
            continue;
        };
        let phone = first_str(sub, &["driver_phone", "phone", "driverPhone"]);
        if phone.is_some() {
            let name = first_str(sub, &["driver_name", "name", "driverName"]);
            let plate = first_str(sub, &["vehicle_plate", "plate", "vehiclePlate"]);
            return (phone, name, plate);
        }
    }

    (None, None, None)
}

fn first_str(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| value.get(k).and_then(Value::as_str))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_driver_phone_from_shipping_subtree() {
        let body = serde_json::json!({
            "data": { "shipping": { "driver_phone": "0900000000", "driver_name": "A" } }
        });
        let (phone, name, plate) = extract_shipper(&body);
        assert_eq!(phone.as_deref(), Some("0900000000"));
        assert_eq!(name.as_deref(), Some("A"));
        assert_eq!(plate, None);
    }

    #[test]
    fn falls_back_through_subtrees_in_order() {
        let body = serde_json::json!({
            "data": { "driver_info": { "phone": "0911111111" } }
        });
        let (phone, _, _) = extract_shipper(&body);
        assert_eq!(phone.as_deref(), Some("0911111111"));
    }
}
