use chrono::Utc;
use domain::config::VoucherConfig;
use domain::model::{
    reference, Money, TransactionType, VoucherOperation, VoucherOperationStatus, VoucherSaveResult,
};
use domain::{AppError, AppResult};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use upstream::{CallOptions, HttpClient, UpstreamRequest};
use uuid::Uuid;
use wallet::audit::AuditLog;
use wallet::ledger::WalletLedger;
use wallet::prices::ServicePriceRegistry;

struct CandidateVoucher {
    code: String,
    promotion_id: String,
    signature: String,
    signature_source: String,
}

fn parse_candidates(blob: &Value) -> Vec<CandidateVoucher> {
    blob.get("data")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    Some(CandidateVoucher {
                        code: entry.get("code")?.as_str()?.to_string(),
                        promotion_id: entry.get("promotion_id")?.as_str()?.to_string(),
                        signature: entry.get("signature")?.as_str()?.to_string(),
                        signature_source: entry
                            .get("signature_source")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

struct CachedCatalogue {
    blob: Value,
    fetched_at: Instant,
}

/// §4.J step 2, §5: "a single string blob under a mutex with TTL".
#[derive(Clone)]
pub struct VoucherCatalogueCache {
    state: Arc<Mutex<Option<CachedCatalogue>>>,
    ttl: Duration,
}

impl VoucherCatalogueCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(None)),
            ttl,
        }
    }

    /// First attempt bare, second (if TTL expired / empty) retried with a
    /// proxy — `HttpClient::call`'s own failover ladder gives us this for free.
    pub async fn get_or_fetch(&self, http: &HttpClient, catalogue_url: &str) -> AppResult<Value> {
        let mut guard = self.state.lock().await;
        if let Some(cached) = guard.as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(cached.blob.clone());
            }
        }

        let req = UpstreamRequest::get(catalogue_url);
        let resp = http
            .call(
                req,
                CallOptions {
                    retry_budget: Some(1),
                    ..Default::default()
                },
            )
            .await?;

        *guard = Some(CachedCatalogue {
            blob: resp.body.clone(),
            fetched_at: Instant::now(),
        });
        Ok(resp.body)
    }
}

/// §4.J: voucher operations + per-candidate save-attempt records.
#[derive(Clone)]
pub struct VoucherStore {
    pool: PgPool,
}

impl VoucherStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[allow(clippy::too_many_arguments)]
    async fn create_pending(
        &self,
        user_id: Uuid,
        session_id: &str,
        cookie_preview: &str,
        charge_transaction_id: Uuid,
    ) -> AppResult<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO voucher_operations
                (id, user_id, session_id, cookie_preview, status, total_found,
                 successful_saves, failed_saves, charge_transaction_id, refund_transaction_id)
             VALUES ($1, $2, $3, $4, $5, 0, 0, 0, $6, NULL)",
        )
        .bind(id)
        .bind(user_id)
        .bind(session_id)
        .bind(cookie_preview)
        .bind("pending")
        .bind(charge_transaction_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(id)
    }

    async fn record_save_result(
        &self,
        operation_id: Uuid,
        voucher_code: &str,
        is_primary_target: bool,
        attempt_number: u32,
        success: bool,
        error_code: i64,
    ) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO voucher_save_results
                (id, operation_id, voucher_code, is_primary_target, attempt_number,
                 success, error_code, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(Uuid::new_v4())
        .bind(operation_id)
        .bind(voucher_code)
        .bind(is_primary_target)
        .bind(attempt_number as i32)
        .bind(success)
        .bind(error_code)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }

    async fn finalize(
        &self,
        operation_id: Uuid,
        status: VoucherOperationStatus,
        total_found: u32,
        successful_saves: u32,
        failed_saves: u32,
        refund_transaction_id: Option<Uuid>,
    ) -> AppResult<()> {
        let status_str = match status {
            VoucherOperationStatus::Pending => "pending",
            VoucherOperationStatus::Success => "success",
            VoucherOperationStatus::Failed => "failed",
        };

        sqlx::query(
            "UPDATE voucher_operations
             SET status = $1, total_found = $2, successful_saves = $3,
                 failed_saves = $4, refund_transaction_id = $5
             WHERE id = $6",
        )
        .bind(status_str)
        .bind(total_found as i32)
        .bind(successful_saves as i32)
        .bind(failed_saves as i32)
        .bind(refund_transaction_id)
        .bind(operation_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }

    pub async fn get(&self, operation_id: Uuid) -> AppResult<Option<VoucherOperation>> {
        let row: Option<(Uuid, Uuid, String, String, String, i32, i32, i32, Uuid, Option<Uuid>)> =
            sqlx::query_as(
                "SELECT id, user_id, session_id, cookie_preview, status, total_found,
                        successful_saves, failed_saves, charge_transaction_id, refund_transaction_id
                 FROM voucher_operations WHERE id = $1",
            )
            .bind(operation_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(row.map(
            |(id, user_id, session_id, cookie_preview, status, total_found, successful_saves,
              failed_saves, charge_transaction_id, refund_transaction_id)| VoucherOperation {
                id,
                user_id,
                session_id,
                cookie_preview,
                status: match status.as_str() {
                    "success" => VoucherOperationStatus::Success,
                    "failed" => VoucherOperationStatus::Failed,
                    _ => VoucherOperationStatus::Pending,
                },
                total_found: total_found as u32,
                successful_saves: successful_saves as u32,
                failed_saves: failed_saves as u32,
                charge_transaction_id,
                refund_transaction_id,
            },
        ))
    }

    /// Looks up the operation a prior, already-completed charge produced.
    /// Used to resolve a duplicate-charge idempotency hit back to its
    /// original result instead of re-running the claim pipeline.
    pub async fn find_by_charge_transaction(
        &self,
        charge_transaction_id: Uuid,
    ) -> AppResult<Option<VoucherOperation>> {
        let row: Option<(Uuid, Uuid, String, String, String, i32, i32, i32, Uuid, Option<Uuid>)> =
            sqlx::query_as(
                "SELECT id, user_id, session_id, cookie_preview, status, total_found,
                        successful_saves, failed_saves, charge_transaction_id, refund_transaction_id
                 FROM voucher_operations WHERE charge_transaction_id = $1",
            )
            .bind(charge_transaction_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(row.map(
            |(id, user_id, session_id, cookie_preview, status, total_found, successful_saves,
              failed_saves, charge_transaction_id, refund_transaction_id)| VoucherOperation {
                id,
                user_id,
                session_id,
                cookie_preview,
                status: match status.as_str() {
                    "success" => VoucherOperationStatus::Success,
                    "failed" => VoucherOperationStatus::Failed,
                    _ => VoucherOperationStatus::Pending,
                },
                total_found: total_found as u32,
                successful_saves: successful_saves as u32,
                failed_saves: failed_saves as u32,
                charge_transaction_id,
                refund_transaction_id,
            },
        ))
    }
}

pub struct VoucherPipeline {
    wallet: WalletLedger,
    prices: ServicePriceRegistry,
    audit: AuditLog,
    store: VoucherStore,
    catalogue: VoucherCatalogueCache,
    http: HttpClient,
    config: VoucherConfig,
    catalogue_url: String,
    claim_url: String,
}

impl VoucherPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        wallet: WalletLedger,
        prices: ServicePriceRegistry,
        audit: AuditLog,
        store: VoucherStore,
        http: HttpClient,
        config: VoucherConfig,
        catalogue_url: String,
        claim_url: String,
    ) -> Self {
        let catalogue = VoucherCatalogueCache::new(config.catalogue_ttl);
        Self {
            wallet,
            prices,
            audit,
            store,
            catalogue,
            http,
            config,
            catalogue_url,
            claim_url,
        }
    }

    /// §4.J: one cookie's full claim run.
    pub async fn save_vouchers(
        &self,
        user_id: Uuid,
        session_id: &str,
        cookie: &str,
    ) -> AppResult<VoucherOperation> {
        let cookie_id = cookie_fingerprint(cookie);
        let cookie_preview = preview(cookie);
        let price = self.prices.lookup("voucher.save").await?;

        let reference = reference::voucher_charge(&user_id.to_string(), session_id, &cookie_id);
        let outcome = self
            .wallet
            .charge(
                user_id,
                price,
                Some(&reference),
                "voucher claim run",
                TransactionType::VoucherCharge,
                serde_json::json!({ "session_id": session_id }),
            )
            .await?;

        let charge_transaction_id = match outcome {
            wallet::LedgerOutcome::Completed { transaction_id, .. } => transaction_id,
            wallet::LedgerOutcome::Duplicate { transaction_id, .. } => {
                if let Some(existing) = self.find_existing_for_charge(transaction_id).await? {
                    return Ok(existing);
                }
                transaction_id
            }
        };

        let operation_id = self
            .store
            .create_pending(user_id, session_id, &cookie_preview, charge_transaction_id)
            .await?;

        let catalogue = self
            .catalogue
            .get_or_fetch(&self.http, &self.catalogue_url)
            .await?;
        let all_candidates = parse_candidates(&catalogue);
        let total_found = all_candidates.len() as u32;
        let mut candidates: Vec<CandidateVoucher> = all_candidates
            .into_iter()
            .filter(|c| c.code.starts_with(&self.config.primary_prefix))
            .collect();
        candidates.truncate(self.config.max_candidate_attempts as usize);

        let mut successful_saves = 0u32;
        let mut failed_saves = 0u32;
        let mut primary_saved = false;

        'candidates: for candidate in &candidates {
            let is_primary = candidate.code.starts_with(&self.config.primary_prefix);
            let attempts = if is_primary {
                self.config.primary_target_attempts
            } else {
                1
            };

            for attempt in 1..=attempts {
                let (success, error_code) =
                    self.attempt_claim(candidate, cookie, &cookie_id).await;

                self.store
                    .record_save_result(
                        operation_id,
                        &candidate.code,
                        is_primary,
                        attempt,
                        success,
                        error_code,
                    )
                    .await?;

                if success {
                    successful_saves += 1;
                    if is_primary {
                        primary_saved = true;
                    }
                    break 'candidates;
                } else if attempt == attempts {
                    failed_saves += 1;
                }
            }
        }

        let final_status = if primary_saved {
            VoucherOperationStatus::Success
        } else {
            VoucherOperationStatus::Failed
        };

        let refund_transaction_id = if final_status == VoucherOperationStatus::Failed {
            self.refund_with_retry(user_id, operation_id, price).await
        } else {
            None
        };

        self.store
            .finalize(
                operation_id,
                final_status,
                total_found,
                successful_saves,
                failed_saves,
                refund_transaction_id,
            )
            .await?;

        self.store
            .get(operation_id)
            .await?
            .ok_or_else(|| AppError::Internal("voucher operation vanished after finalize".into()))
    }

    async fn attempt_claim(
        &self,
        candidate: &CandidateVoucher,
        cookie: &str,
        device_fingerprint: &str,
    ) -> (bool, i64) {
        let req = UpstreamRequest::post(
            self.claim_url.clone(),
            serde_json::json!({
                "voucher_promotionid": candidate.promotion_id,
                "signature": candidate.signature,
                "security_device_fingerprint": device_fingerprint,
                "signature_source": candidate.signature_source,
            }),
        )
        .with_header("Cookie", cookie.to_string());

        match self.http.call(req, CallOptions::default()).await {
            Ok(resp) => {
                let error_code = resp.body.get("error").and_then(Value::as_i64).unwrap_or(-1);
                (error_code == 0, error_code)
            }
            Err(_) => (false, -1),
        }
    }

    /// §4.J step 5: up to 3 refund attempts with exponential backoff; an
    /// urgent audit entry is emitted only if every attempt fails.
    async fn refund_with_retry(&self, user_id: Uuid, operation_id: Uuid, price: Money) -> Option<Uuid> {
        let reference = reference::voucher_refund(&operation_id.to_string());
        let mut delay = Duration::from_millis(500);

        for attempt in 1..=self.config.refund_retry_budget {
            match self
                .wallet
                .refund(
                    user_id,
                    price,
                    Some(&reference),
                    "voucher claim run failed",
                    TransactionType::Refund,
                    serde_json::json!({ "operation_id": operation_id }),
                )
                .await
            {
                Ok(wallet::LedgerOutcome::Completed { transaction_id, .. })
                | Ok(wallet::LedgerOutcome::Duplicate { transaction_id, .. }) => {
                    return Some(transaction_id)
                }
                Err(err) => {
                    tracing::warn!(operation_id = %operation_id, attempt, error = %err, "voucher refund attempt failed");
                    if attempt < self.config.refund_retry_budget {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }

        self.audit
            .log_urgent(
                Some(user_id),
                "voucher.refund_failed",
                serde_json::json!({ "operation_id": operation_id }),
            )
            .await
            .ok();
        None
    }

    async fn find_existing_for_charge(&self, charge_transaction_id: Uuid) -> AppResult<Option<VoucherOperation>> {
        self.store.find_by_charge_transaction(charge_transaction_id).await
    }
}

fn cookie_fingerprint(cookie: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(cookie.as_bytes());
    hex_encode(&hasher.finalize())
}

fn preview(cookie: &str) -> String {
    cookie.chars().take(12).collect::<String>() + "…"
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        assert_eq!(cookie_fingerprint("abc"), cookie_fingerprint("abc"));
        assert_ne!(cookie_fingerprint("abc"), cookie_fingerprint("abd"));
    }

    #[test]
    fn candidates_parse_from_catalogue_blob() {
        let blob = serde_json::json!({
            "data": [
                { "code": "PRIMARY1", "promotion_id": "p1", "signature": "s1" },
                { "code": "GENERIC1", "promotion_id": "p2", "signature": "s2" },
            ]
        });
        let candidates = parse_candidates(&blob);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].code, "PRIMARY1");
    }
}
