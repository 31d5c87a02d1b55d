use thiserror::Error;

/// The user-facing error taxonomy of the operations engine (see spec §7).
///
/// Every fallible operation in `wallet`, `upstream`, `rental`, and `services`
/// resolves to one of these. `server` maps each variant to an HTTP status;
/// nothing downstream of this type should invent its own status code.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("authentication required")]
    Auth,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("insufficient funds: balance {balance} < amount {amount}")]
    InsufficientFunds { balance: i64, amount: i64 },

    #[error("rate limited, retry after {retry_after_ms}ms: {message}")]
    RateLimited {
        retry_after_ms: u64,
        message: String,
    },

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("cookie expired")]
    CookieExpired,

    #[error("duplicate request, returning prior result")]
    Duplicate,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether this error class should trigger a refund of any in-flight charge
    /// on the request path (see §7 propagation policy).
    pub fn should_refund_in_flight_charge(&self) -> bool {
        matches!(
            self,
            AppError::UpstreamUnavailable(_) | AppError::Internal(_)
        )
    }

    /// HTTP status mapping per spec §6: nothing downstream of this type
    /// should invent its own status code.
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Validation(_) => 400,
            AppError::Auth => 401,
            AppError::Forbidden(_) => 403,
            AppError::InsufficientFunds { .. } => 400,
            AppError::RateLimited { .. } => 429,
            AppError::UpstreamUnavailable(_) => 502,
            AppError::CookieExpired => 400,
            AppError::Duplicate => 200,
            AppError::NotFound(_) => 404,
            AppError::Database(_) => 500,
            AppError::Internal(_) => 500,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
