mod auth;
mod config;
mod error;
mod reaper;
mod routes;
mod state;

use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use config::{Args, Config};
use eyre::{eyre, Result};
use rental::{
    GlobalBoundedQueue, PlatformProbe, RateLimiter, RentalOrchestrator, SecondaryPlatformProvider,
    SessionStore, SmsProvider, Tier1Provider, Tier2Provider, Tier3Provider,
};
use services::{RapidLookup, RapidStore, VoucherPipeline, VoucherStore};
use sqlx::postgres::PgPoolOptions;
use state::AppState;
use std::sync::Arc;
use std::time::Duration;
use upstream::{HttpClient, ProxyPool};
use wallet::{AuditLog, ServicePriceRegistry, WalletLedger};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    dotenvy::dotenv().ok();

    let args = Args::parse();
    let config = Config::from_args(args)?;

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await
        .map_err(|e| eyre!("failed to connect to database: {e}"))?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| eyre!("failed to run migrations: {e}"))?;

    // Proxy pool starts empty; operators seed it via the database and
    // `/admin/proxy-health` flips entries active once they prove healthy.
    let proxies = ProxyPool::new(Vec::new());
    let http = HttpClient::new(proxies.clone(), config.upstream.clone());

    let wallet = WalletLedger::new(pool.clone());
    let prices = ServicePriceRegistry::new(pool.clone());
    let audit = AuditLog::new(pool.clone());

    let providers: Vec<Arc<dyn SmsProvider>> = vec![
        Arc::new(Tier1Provider::new(http.clone(), config.tier1_provider_url.clone())),
        Arc::new(Tier2Provider::new(http.clone(), config.tier2_provider_url.clone())),
        Arc::new(Tier3Provider::new(http.clone(), config.tier3_provider_url.clone())),
        Arc::new(SecondaryPlatformProvider::new(
            http.clone(),
            config.platform_base_url.clone(),
        )),
    ];
    let platform_probe = Arc::new(PlatformProbe::new(http.clone(), config.platform_base_url.clone()));
    let sessions = SessionStore::new(pool.clone());
    let queue = GlobalBoundedQueue::new(
        config.throttle.global_queue_cap,
        config.throttle.per_user_min_interval,
    );
    let rate_limiter = RateLimiter::new(config.throttle.clone());

    let orchestrator = Arc::new(RentalOrchestrator::new(
        sessions,
        wallet.clone(),
        prices.clone(),
        queue,
        audit.clone(),
        providers,
        platform_probe.clone(),
        config.rental.clone(),
    ));

    let voucher_store = VoucherStore::new(pool.clone());
    let voucher = Arc::new(VoucherPipeline::new(
        wallet.clone(),
        prices.clone(),
        audit.clone(),
        voucher_store,
        http.clone(),
        config.voucher.clone(),
        format!("{}/voucher/catalogue", config.platform_base_url),
        format!("{}/voucher/claim", config.platform_base_url),
    ));

    let rapid_store = RapidStore::new(pool.clone());
    let rapid = Arc::new(RapidLookup::new(
        wallet.clone(),
        prices.clone(),
        rapid_store,
        http.clone(),
        config.rapid.clone(),
        format!("{}/order/list", config.platform_base_url),
        format!("{}/order/detail?order_id={{order_id}}", config.platform_base_url),
    ));

    let app_state = AppState {
        orchestrator,
        voucher,
        rapid,
        wallet,
        audit,
        proxies,
        platform_probe,
        http,
        platform_base_url: config.platform_base_url.clone().into(),
        bank_webhook_token: config.bank_webhook_token.clone().into(),
        proxy_probe_url: format!("{}/health", config.platform_base_url).into(),
        proxy_probe_timeout: Duration::from_secs(5),
        rate_limiter,
    };

    let reaper_state = app_state.clone();
    let reaper_pool = pool.clone();
    let reaper_config = config.reaper.clone();
    tokio::spawn(async move {
        reaper::run(reaper_state, reaper_pool, reaper_config).await;
    });

    let router = Router::new()
        .route("/phone-rental/start", post(routes::rental::start))
        .route("/phone-rental/get-otp", get(routes::rental::get_otp))
        .route(
            "/phone-rental/active-sessions",
            post(routes::rental::active_sessions),
        )
        .route("/voucher-saving", post(routes::voucher::voucher_saving))
        .route(
            "/cookie-rapid-check",
            post(routes::rapid::cookie_rapid_check),
        )
        .route(
            "/account-check/bulk",
            post(routes::account_check::account_check_bulk),
        )
        .route(
            "/tracking-checks/bulk",
            post(routes::tracking::tracking_checks_bulk),
        )
        .route("/webhooks/bank-deposit", post(routes::webhooks::bank_deposit))
        .route("/admin/proxy-health", post(routes::admin::run_health_check))
        .with_state(app_state);

    tracing::info!(addr = %config.bind_addr, "server starting");

    axum::Server::bind(&config.bind_addr)
        .serve(router.into_make_service())
        .await
        .map_err(|e| eyre!("server error: {e}"))?;

    Ok(())
}
