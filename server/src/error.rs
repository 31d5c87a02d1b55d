use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use domain::AppError;
use serde_json::json;

/// Wraps `AppError` so route handlers can just `?` out of `domain`'s result
/// type; the HTTP status mapping lives once, in `AppError::status_code`.
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let message = message_for(&self.0);

        let mut response = (status, Json(json!({ "message": message }))).into_response();

        if let AppError::RateLimited { retry_after_ms, .. } = &self.0 {
            let seconds = (retry_after_ms / 1000).max(1).to_string();
            if let Ok(value) = axum::http::HeaderValue::from_str(&seconds) {
                response
                    .headers_mut()
                    .insert(axum::http::header::RETRY_AFTER, value);
            }
        }

        response
    }
}

/// Vietnamese-language user-facing text per spec §6; internal detail stays
/// in the tracing logs, not the response body.
fn message_for(err: &AppError) -> String {
    match err {
        AppError::Validation(msg) => msg.clone(),
        AppError::Auth => "vui lòng đăng nhập lại".to_string(),
        AppError::Forbidden(msg) => msg.clone(),
        AppError::InsufficientFunds { balance, amount } => {
            format!("số dư không đủ: hiện có {balance}, cần {amount}")
        }
        AppError::RateLimited { message, .. } => message.clone(),
        AppError::UpstreamUnavailable(_) => "hệ thống đang gặp sự cố, vui lòng thử lại sau".to_string(),
        AppError::CookieExpired => "cookie đã hết hạn, vui lòng cập nhật".to_string(),
        AppError::Duplicate => "yêu cầu đã được xử lý trước đó".to_string(),
        AppError::NotFound(msg) => msg.clone(),
        AppError::Database(_) | AppError::Internal(_) => "lỗi hệ thống".to_string(),
    }
}
