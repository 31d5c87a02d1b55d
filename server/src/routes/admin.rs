use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ProxyHealthResponse {
    pub active_count: usize,
}

/// Admin-triggered proxy health check (spec §4.B: "A periodic health check
/// (callable from admin) probes each entry"). Real admin authorization is
/// out of scope; this route assumes it sits behind whatever gateway enforces
/// the `admin`/`superadmin` role.
pub async fn run_health_check(State(state): State<AppState>) -> Json<ProxyHealthResponse> {
    state
        .proxies
        .health_check_all(&state.proxy_probe_url, state.proxy_probe_timeout)
        .await;
    let active_count = state.proxies.active_snapshot().await.len();
    Json(ProxyHealthResponse { active_count })
}
