use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use upstream::{CallOptions, UpstreamRequest};

#[derive(Debug, Deserialize)]
pub struct TrackingEntry {
    pub order_id: String,
    pub cookie: String,
}

#[derive(Debug, Deserialize)]
pub struct TrackingBulkRequest {
    pub entries: Vec<TrackingEntry>,
}

#[derive(Debug, Serialize)]
pub struct TrackingResult {
    pub order_id: String,
    pub status: String,
    pub error: Option<String>,
}

/// `POST /tracking-checks/bulk {entries[]}` — per-entry order status, read
/// from the same detail endpoint the rapid-shipper lookup enriches from.
pub async fn tracking_checks_bulk(
    State(state): State<AppState>,
    Json(req): Json<TrackingBulkRequest>,
) -> Json<Vec<TrackingResult>> {
    let mut results = Vec::with_capacity(req.entries.len());

    for entry in req.entries {
        let req = UpstreamRequest::get(format!(
            "{}/order/detail?order_id={}",
            state.platform_base_url, entry.order_id
        ))
        .with_header("Cookie", entry.cookie.clone());

        let result = match state.http.call(req, CallOptions::default()).await {
            Ok(resp) => {
                let status = resp
                    .body
                    .get("data")
                    .and_then(|d| d.get("processing_info"))
                    .and_then(|p| p.get("info_rows"))
                    .and_then(Value::as_array)
                    .and_then(|rows| rows.last())
                    .and_then(|row| row.get("text"))
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();

                TrackingResult {
                    order_id: entry.order_id,
                    status,
                    error: None,
                }
            }
            Err(err) => TrackingResult {
                order_id: entry.order_id,
                status: "error".to_string(),
                error: Some(err.to_string()),
            },
        };
        results.push(result);
    }

    Json(results)
}
