use crate::state::AppState;
use domain::config::ReaperConfig;
use wallet::IdempotencyIndex;

/// §4.L driver loop: wake up, sweep expired rental sessions, purge stale
/// idempotency records, sleep, repeat.
pub async fn run(state: AppState, pool: sqlx::PgPool, config: ReaperConfig) {
    loop {
        match state.orchestrator.reap_expired().await {
            Ok(reaped) if reaped > 0 => tracing::info!(reaped, "reaper swept expired sessions"),
            Ok(_) => {}
            Err(err) => tracing::error!(error = %err, "reaper sweep failed"),
        }

        if let Err(err) = IdempotencyIndex::purge_older_than(&pool, config.idempotency_retention).await {
            tracing::error!(error = %err, "idempotency retention purge failed");
        }

        tokio::time::sleep(config.sweep_interval).await;
    }
}
