use rental::{PlatformProbe, RateLimiter, RentalOrchestrator};
use services::{RapidLookup, VoucherPipeline};
use std::sync::Arc;
use std::time::Duration;
use upstream::{HttpClient, ProxyPool};
use wallet::{AuditLog, WalletLedger};

/// Everything a route handler needs. Cloneable (all fields are `Arc`/cheap
/// handles), the way axum wants shared state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<RentalOrchestrator>,
    pub voucher: Arc<VoucherPipeline>,
    pub rapid: Arc<RapidLookup>,
    pub wallet: WalletLedger,
    pub audit: AuditLog,
    pub proxies: ProxyPool,
    pub platform_probe: Arc<PlatformProbe>,
    pub http: HttpClient,
    pub platform_base_url: Arc<str>,
    pub bank_webhook_token: Arc<str>,
    /// URL probed by `/admin/proxy-health` (§4.B) and the timeout per probe.
    pub proxy_probe_url: Arc<str>,
    pub proxy_probe_timeout: Duration,
    /// §4.F: per-(user, service) anti-spam, consulted by every charging route.
    pub rate_limiter: RateLimiter,
}
