use clap::Parser;
use domain::config::{RapidConfig, ReaperConfig, RentalConfig, ThrottleConfig, UpstreamConfig, VoucherConfig};
use eyre::Result;
use std::net::SocketAddr;

/// CLI/env surface: `clap::Parser` with `env` fallbacks, resolved once at
/// startup into a plain `Config`.
#[derive(Parser, Debug)]
#[command(name = "server", version, about = "Operations engine HTTP API")]
pub struct Args {
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: SocketAddr,

    /// Shared secret required on `/webhooks/bank-deposit`.
    #[arg(long, env = "BANK_WEBHOOK_TOKEN")]
    pub bank_webhook_token: String,

    #[arg(long, env = "PLATFORM_BASE_URL")]
    pub platform_base_url: String,

    #[arg(long, env = "TIER1_PROVIDER_URL")]
    pub tier1_provider_url: String,

    #[arg(long, env = "TIER2_PROVIDER_URL")]
    pub tier2_provider_url: String,

    #[arg(long, env = "TIER3_PROVIDER_URL")]
    pub tier3_provider_url: String,

    #[arg(long, env = "REAPER_INTERVAL_SECONDS", default_value_t = 30)]
    pub reaper_interval_seconds: u64,

    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 10)]
    pub db_max_connections: u32,
}

pub struct Config {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub bank_webhook_token: String,
    pub platform_base_url: String,
    pub tier1_provider_url: String,
    pub tier2_provider_url: String,
    pub tier3_provider_url: String,
    pub db_max_connections: u32,
    pub throttle: ThrottleConfig,
    pub rental: RentalConfig,
    pub voucher: VoucherConfig,
    pub rapid: RapidConfig,
    pub reaper: ReaperConfig,
    pub upstream: UpstreamConfig,
}

impl Config {
    pub fn from_args(args: Args) -> Result<Self> {
        let mut reaper = ReaperConfig::default();
        reaper.sweep_interval = std::time::Duration::from_secs(args.reaper_interval_seconds);

        Ok(Self {
            database_url: args.database_url,
            bind_addr: args.bind_addr,
            bank_webhook_token: args.bank_webhook_token,
            platform_base_url: args.platform_base_url,
            tier1_provider_url: args.tier1_provider_url,
            tier2_provider_url: args.tier2_provider_url,
            tier3_provider_url: args.tier3_provider_url,
            db_max_connections: args.db_max_connections,
            throttle: ThrottleConfig::default(),
            rental: RentalConfig::default(),
            voucher: VoucherConfig::default(),
            rapid: RapidConfig::default(),
            reaper,
            upstream: UpstreamConfig::default(),
        })
    }
}
