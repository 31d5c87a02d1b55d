use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::Json;
use domain::model::RentalTier;
use domain::AppError;
use rental::{format_remaining, OtpResult, RateLimitDecision};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub tier: RentalTier,
    pub carrier: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub session_id: String,
    pub phone_number: Option<String>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub cost: i64,
}

/// `POST /phone-rental/start {tier, carrier}`.
pub async fn start(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<StartRequest>,
) -> Result<Json<StartResponse>, ApiError> {
    if let RateLimitDecision::Rejected { retry_after } =
        state.rate_limiter.check(user_id, "phone-rental.start").await
    {
        return Err(ApiError(AppError::RateLimited {
            retry_after_ms: retry_after.as_millis() as u64,
            message: format!("vui lòng thử lại sau {}", format_remaining(retry_after)),
        }));
    }

    let session = state
        .orchestrator
        .start(user_id, req.tier, req.carrier)
        .await?;

    Ok(Json(StartResponse {
        session_id: session.session_id,
        phone_number: session.phone_number,
        expires_at: session.expires_at,
        cost: session.cost,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetOtpQuery {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct GetOtpResponse {
    pub status: &'static str,
    pub otp: Option<String>,
    pub message: String,
    pub refunded: bool,
}

/// `GET /phone-rental/get-otp?sessionId=…`.
pub async fn get_otp(
    State(state): State<AppState>,
    Query(query): Query<GetOtpQuery>,
) -> Result<Json<GetOtpResponse>, ApiError> {
    let result = state.orchestrator.get_otp(&query.session_id).await?;

    let response = match result {
        OtpResult::Waiting => GetOtpResponse {
            status: "waiting",
            otp: None,
            message: "đang chờ mã OTP".to_string(),
            refunded: false,
        },
        OtpResult::Completed(otp) => GetOtpResponse {
            status: "completed",
            otp: Some(otp),
            message: "đã nhận được mã OTP".to_string(),
            refunded: false,
        },
        OtpResult::Expired => GetOtpResponse {
            status: "expired",
            otp: None,
            message: "phiên thuê số đã hết hạn, đã hoàn tiền".to_string(),
            refunded: true,
        },
        OtpResult::Error(message) => GetOtpResponse {
            status: "error",
            otp: None,
            message,
            refunded: true,
        },
    };

    Ok(Json(response))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub tier: RentalTier,
    pub status: domain::model::SessionStatus,
    pub phone_number: Option<String>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

/// `POST /phone-rental/active-sessions` — user-scoped listing that doubles
/// as a reaper trigger (spec §6): callers that poll this also sweep any of
/// their own sessions that are past their deadline.
pub async fn active_sessions(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<SessionSummary>>, ApiError> {
    state.orchestrator.reap_expired().await.ok();

    let sessions = state.orchestrator.list_sessions(user_id).await?;
    Ok(Json(
        sessions
            .into_iter()
            .map(|s| SessionSummary {
                session_id: s.session_id,
                tier: s.tier,
                status: s.status,
                phone_number: s.phone_number,
                expires_at: s.expires_at,
            })
            .collect(),
    ))
}
