use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use domain::model::RapidOrder;
use domain::AppError;
use rental::{format_remaining, RateLimitDecision};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct RapidCheckRequest {
    pub cookie: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RapidCheckResponse {
    pub status: bool,
    pub message: String,
    pub driver_phone: Option<String>,
    pub driver_name: Option<String>,
    pub charged: bool,
    pub amount_charged: i64,
    pub is_from_history: bool,
    pub orders: Vec<RapidOrder>,
}

/// `POST /cookie-rapid-check {cookie}`.
pub async fn cookie_rapid_check(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<RapidCheckRequest>,
) -> Result<Json<RapidCheckResponse>, ApiError> {
    if let RateLimitDecision::Rejected { retry_after } =
        state.rate_limiter.check(user_id, "cookie-rapid-check").await
    {
        return Err(ApiError(AppError::RateLimited {
            retry_after_ms: retry_after.as_millis() as u64,
            message: format!("vui lòng thử lại sau {}", format_remaining(retry_after)),
        }));
    }

    match state.rapid.check(user_id, &req.cookie).await {
        Ok(outcome) => Ok(Json(RapidCheckResponse {
            status: outcome.check.status,
            message: if outcome.check.status {
                "tìm thấy thông tin người giao hàng".to_string()
            } else {
                "không tìm thấy thông tin người giao hàng, đã hoàn tiền".to_string()
            },
            driver_phone: outcome.check.driver_phone,
            driver_name: outcome.check.driver_name,
            charged: outcome.charged,
            amount_charged: outcome.amount_charged,
            is_from_history: outcome.is_from_history,
            orders: outcome.check.orders,
        })),
        Err(AppError::CookieExpired) => Err(ApiError(AppError::CookieExpired)),
        Err(other) => Err(ApiError(other)),
    }
}
