use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use domain::AppError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The operator's deposit-notification partner, not the platform the rest
/// of this crate automates — a supplemented endpoint (no counterpart in the
/// order/OTP/voucher flows) for crediting a user's wallet on a confirmed
/// bank transfer.
#[derive(Debug, Deserialize)]
pub struct BankDepositWebhook {
    pub user_id: Uuid,
    pub amount: i64,
    pub bank_reference: String,
}

#[derive(Debug, Serialize)]
pub struct BankDepositResponse {
    pub transaction_id: Uuid,
    pub balance_after: i64,
}

/// `POST /webhooks/bank-deposit`, guarded by a shared-secret header rather
/// than the bearer-token auth every other route uses — this caller is the
/// bank's notification system, not one of our users.
pub async fn bank_deposit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<BankDepositWebhook>,
) -> Result<Json<BankDepositResponse>, ApiError> {
    let provided = headers
        .get("X-Webhook-Token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if provided != state.bank_webhook_token.as_ref() {
        return Err(ApiError(AppError::Forbidden(
            "invalid webhook token".to_string(),
        )));
    }

    if body.amount <= 0 {
        return Err(ApiError(AppError::Validation(
            "deposit amount must be positive".to_string(),
        )));
    }

    let reference = domain::model::reference::bank_deposit(&body.bank_reference);
    let outcome = state
        .wallet
        .refund(
            body.user_id,
            body.amount,
            Some(&reference),
            &format!("bank deposit {}", body.bank_reference),
            domain::model::TransactionType::Credit,
            serde_json::json!({ "bank_reference": body.bank_reference }),
        )
        .await?;

    state
        .audit
        .log(
            Some(body.user_id),
            "wallet.bank_deposit",
            serde_json::json!({ "amount": body.amount, "bank_reference": body.bank_reference }),
        )
        .await
        .ok();

    let (transaction_id, balance_after) = match outcome {
        wallet::LedgerOutcome::Completed { transaction_id, balance_after }
        | wallet::LedgerOutcome::Duplicate { transaction_id, balance_after } => {
            (transaction_id, balance_after)
        }
    };

    Ok(Json(BankDepositResponse {
        transaction_id,
        balance_after,
    }))
}
