use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct AccountCheckEntry {
    pub phone: String,
}

#[derive(Debug, Deserialize)]
pub struct AccountCheckRequest {
    pub entries: Vec<AccountCheckEntry>,
}

#[derive(Debug, Serialize)]
pub struct AccountCheckResult {
    pub phone: String,
    pub registered: Option<bool>,
    pub error: Option<String>,
}

/// `POST /account-check/bulk {entries[]}` — the same platform probe the
/// rental orchestrator uses internally to reject already-registered
/// numbers, exposed here as a standalone bulk lookup.
pub async fn account_check_bulk(
    State(state): State<AppState>,
    Json(req): Json<AccountCheckRequest>,
) -> Json<Vec<AccountCheckResult>> {
    let mut results = Vec::with_capacity(req.entries.len());

    for entry in req.entries {
        let result = match state.platform_probe.is_number_registered(&entry.phone).await {
            Ok(registered) => AccountCheckResult {
                phone: entry.phone,
                registered: Some(registered),
                error: None,
            },
            Err(err) => AccountCheckResult {
                phone: entry.phone,
                registered: None,
                error: Some(err.to_string()),
            },
        };
        results.push(result);
    }

    Json(results)
}
