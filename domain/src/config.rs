use std::time::Duration;

/// Tunables for §4.F (rate limiter) and §4.G (global bounded queue).
///
/// Plain `Duration`/count fields built once at startup from CLI flags and
/// env overrides, then passed down by reference instead of re-read per call.
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// §4.F: sliding window width.
    pub rate_limit_window: Duration,
    /// §4.F: attempts allowed per window before cool-down.
    pub rate_limit_threshold: u32,
    /// §4.F: cool-down duration once tripped.
    pub rate_limit_cooldown: Duration,
    /// §4.G: max concurrent WAITING/ALLOCATED sessions of the bounded tier.
    pub global_queue_cap: usize,
    /// §4.G: minimum interval between a user's successive rent attempts.
    pub per_user_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            rate_limit_window: Duration::from_secs(60),
            rate_limit_threshold: 15,
            rate_limit_cooldown: Duration::from_secs(30),
            global_queue_cap: 15,
            per_user_min_interval: Duration::from_secs(2),
        }
    }
}

/// Tunables for §4.I (rental orchestrator).
#[derive(Debug, Clone)]
pub struct RentalConfig {
    pub session_ttl: Duration,
    pub max_total_attempts: u32,
    pub tier3_max_number_checks: u32,
    pub transport_retry_budget: u32,
    pub otp_poll_min_interval: Duration,
    pub forbidden_prefixes: Vec<String>,
}

impl Default for RentalConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(6 * 60),
            max_total_attempts: 10,
            tier3_max_number_checks: 3,
            transport_retry_budget: 3,
            otp_poll_min_interval: Duration::from_secs(5),
            forbidden_prefixes: vec!["995".to_string()],
        }
    }
}

/// Tunables for §4.J (voucher pipeline).
#[derive(Debug, Clone)]
pub struct VoucherConfig {
    pub catalogue_ttl: Duration,
    pub max_candidate_attempts: u32,
    pub primary_target_attempts: u32,
    pub refund_retry_budget: u32,
    /// Voucher codes starting with this prefix are the "primary target"
    /// subset (spec §4.J step 3) eligible for up to `primary_target_attempts`.
    pub primary_prefix: String,
}

impl Default for VoucherConfig {
    fn default() -> Self {
        Self {
            catalogue_ttl: Duration::from_secs(30 * 60),
            max_candidate_attempts: 7,
            primary_target_attempts: 3,
            refund_retry_budget: 3,
            primary_prefix: "PRIMARY".to_string(),
        }
    }
}

/// Tunables for §4.K (rapid-shipper lookup).
#[derive(Debug, Clone)]
pub struct RapidConfig {
    pub dedup_window: Duration,
    pub order_list_limit: u32,
}

impl Default for RapidConfig {
    fn default() -> Self {
        Self {
            dedup_window: Duration::from_secs(72 * 60 * 60),
            order_list_limit: 5,
        }
    }
}

/// Tunables for §4.L (reaper).
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    pub sweep_interval: Duration,
    pub idempotency_retention: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(30),
            idempotency_retention: Duration::from_secs(90 * 24 * 60 * 60),
        }
    }
}

/// Tunables for §4.A (upstream HTTP client).
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub data_timeout: Duration,
    pub auth_timeout: Duration,
    pub retry_budget: u32,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            data_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(15),
            retry_budget: 3,
        }
    }
}
