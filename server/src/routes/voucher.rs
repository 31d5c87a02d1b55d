use crate::auth::AuthUser;
use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use rental::{format_remaining, RateLimitDecision};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct VoucherSavingRequest {
    pub cookies: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoucherSavingResult {
    pub cookie_preview: String,
    pub status: &'static str,
    pub total_found: u32,
    pub successful_saves: u32,
    pub failed_saves: u32,
    pub message: String,
}

/// `POST /voucher-saving {cookies[]}` → one result per cookie. A failure on
/// one cookie does not abort the others — each is its own charge/refund unit.
pub async fn voucher_saving(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<VoucherSavingRequest>,
) -> Json<Vec<VoucherSavingResult>> {
    let mut results = Vec::with_capacity(req.cookies.len());

    for cookie in &req.cookies {
        if let RateLimitDecision::Rejected { retry_after } =
            state.rate_limiter.check(user_id, "voucher-saving").await
        {
            results.push(VoucherSavingResult {
                cookie_preview: cookie.chars().take(12).collect::<String>() + "…",
                status: "failed",
                total_found: 0,
                successful_saves: 0,
                failed_saves: 0,
                message: format!("vui lòng thử lại sau {}", format_remaining(retry_after)),
            });
            continue;
        }

        let session_id = Uuid::new_v4().to_string();
        let result = match state.voucher.save_vouchers(user_id, &session_id, cookie).await {
            Ok(op) => VoucherSavingResult {
                cookie_preview: op.cookie_preview,
                status: if op.status == domain::model::VoucherOperationStatus::Success {
                    "success"
                } else {
                    "failed"
                },
                total_found: op.total_found,
                successful_saves: op.successful_saves,
                failed_saves: op.failed_saves,
                message: if op.refund_transaction_id.is_some() {
                    "không lưu được voucher, đã hoàn tiền".to_string()
                } else {
                    "đã lưu voucher thành công".to_string()
                },
            },
            Err(err) => VoucherSavingResult {
                cookie_preview: cookie.chars().take(12).collect::<String>() + "…",
                status: "failed",
                total_found: 0,
                successful_saves: 0,
                failed_saves: 0,
                message: err.to_string(),
            },
        };
        results.push(result);
    }

    Json(results)
}
