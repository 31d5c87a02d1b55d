use crate::providers::{NumberOutcome, OtpPoll, PlatformProbe, SmsProvider};
use crate::queue::{AdmitDecision, GlobalBoundedQueue};
use crate::rate_limit::format_remaining;
use crate::session_store::SessionStore;
use chrono::Utc;
use domain::config::RentalConfig;
use domain::model::{reference, RentalSession, RentalTier, SessionStatus, TransactionType};
use domain::{AppError, AppResult};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;
use wallet::audit::AuditLog;
use wallet::ledger::WalletLedger;
use wallet::prices::ServicePriceRegistry;

fn service_key(tier: RentalTier) -> &'static str {
    match tier {
        RentalTier::Tier1 => "rental.tier1",
        RentalTier::Tier2 => "rental.tier2",
        RentalTier::Tier3 => "rental.tier3",
        RentalTier::SecondaryPlatform => "rental.secondary_platform",
    }
}

#[derive(Debug, Clone)]
pub enum OtpResult {
    Waiting,
    Completed(String),
    Expired,
    /// Terminal, non-retryable provider error, surfaced without refunding
    /// again if a transition already happened elsewhere.
    Error(String),
}

/// §4.I: the rental orchestrator. Consumes the upstream HTTP layer (via the
/// injected `SmsProvider`s and `PlatformProbe`), the wallet ledger, the
/// global bounded queue, and the session store.
pub struct RentalOrchestrator {
    sessions: SessionStore,
    wallet: WalletLedger,
    prices: ServicePriceRegistry,
    queue: GlobalBoundedQueue,
    audit: AuditLog,
    providers: HashMap<RentalTier, Arc<dyn SmsProvider>>,
    platform_probe: Arc<PlatformProbe>,
    config: RentalConfig,
    otp_throttle: Arc<Mutex<HashMap<String, std::time::Instant>>>,
}

impl RentalOrchestrator {
    pub fn new(
        sessions: SessionStore,
        wallet: WalletLedger,
        prices: ServicePriceRegistry,
        queue: GlobalBoundedQueue,
        audit: AuditLog,
        providers: Vec<Arc<dyn SmsProvider>>,
        platform_probe: Arc<PlatformProbe>,
        config: RentalConfig,
    ) -> Self {
        let providers = providers.into_iter().map(|p| (p.id(), p)).collect();
        Self {
            sessions,
            wallet,
            prices,
            queue,
            audit,
            providers,
            platform_probe,
            config,
            otp_throttle: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// `CREATED -> WAITING -> ALLOCATED` (or `FAILED`). Returns the session
    /// in its final post-allocation-attempt state.
    pub async fn start(
        &self,
        user_id: Uuid,
        tier: RentalTier,
        carrier: String,
    ) -> AppResult<RentalSession> {
        let globally_bounded = tier.is_globally_bounded();
        let session_id = Uuid::new_v4().to_string();

        if globally_bounded {
            match self.queue.admit(user_id, &session_id).await {
                AdmitDecision::Allowed => {}
                AdmitDecision::DenyGlobal { next_slot_estimate } => {
                    return Err(AppError::RateLimited {
                        retry_after_ms: next_slot_estimate.as_millis() as u64,
                        message: format!(
                            "hệ thống đang đầy, thử lại sau khoảng {}",
                            format_remaining(next_slot_estimate)
                        ),
                    });
                }
                AdmitDecision::DenyUser { wait } => {
                    return Err(AppError::RateLimited {
                        retry_after_ms: wait.as_millis() as u64,
                        message: format!("vui lòng đợi {} trước khi thử lại", format_remaining(wait)),
                    });
                }
            }
        }

        let price = match self.prices.lookup(service_key(tier)).await {
            Ok(p) => p,
            Err(err) => {
                if globally_bounded {
                    self.queue.leave(&session_id).await;
                }
                return Err(err);
            }
        };

        if let Err(err) = self
            .wallet
            .charge(
                user_id,
                price,
                Some(&reference::session_charge(&session_id)),
                "phone rental reservation",
                TransactionType::RentalCharge,
                serde_json::json!({ "session_id": session_id, "tier": service_key(tier) }),
            )
            .await
        {
            if globally_bounded {
                self.queue.leave(&session_id).await;
            }
            return Err(err);
        }

        let session = match self
            .sessions
            .create_waiting(&session_id, user_id, tier, &carrier, price, self.config.session_ttl)
            .await
        {
            Ok(s) => s,
            Err(err) => {
                // The charge committed but the session row didn't: compensate.
                // This is the one place cross-crate atomicity is only
                // approximated (see DESIGN.md) — acceptable under spec §1's
                // "eventual consistency" non-goal.
                self.refund_session(&session_id, user_id, price, "session creation failed")
                    .await;
                if globally_bounded {
                    self.queue.leave(&session_id).await;
                }
                return Err(err);
            }
        };

        self.audit
            .log(
                Some(user_id),
                "rental.session_created",
                serde_json::json!({ "session_id": session_id, "tier": service_key(tier) }),
            )
            .await
            .ok();

        match self.try_allocate(&session, &carrier).await {
            Ok(allocated) => Ok(allocated),
            Err(err) => {
                tracing::warn!(session_id, error = %err, "allocation failed");
                Err(err)
            }
        }
    }

    async fn try_allocate(&self, session: &RentalSession, carrier: &str) -> AppResult<RentalSession> {
        let provider = self
            .providers
            .get(&session.tier)
            .ok_or_else(|| AppError::Internal(format!("no provider wired for {:?}", session.tier)))?
            .clone();

        let mut total_attempts = 0u32;
        let mut number_checks = 0u32;
        let tier3 = session.tier == RentalTier::Tier3;

        while total_attempts < self.config.max_total_attempts
            && (!tier3 || number_checks < self.config.tier3_max_number_checks)
        {
            total_attempts += 1;

            let outcome = self.call_with_transport_retry(provider.as_ref(), carrier).await;

            let acquisition = match outcome {
                Ok(NumberOutcome::InsufficientProviderBalance) => {
                    tracing::warn!(session_id = %session.session_id, "provider reports insufficient balance; aborting without retry");
                    self.fail_and_refund(session).await;
                    return Err(AppError::UpstreamUnavailable(
                        "provider insufficient balance".into(),
                    ));
                }
                Ok(NumberOutcome::Allocated(acq)) => acq,
                Err(err) => {
                    tracing::warn!(session_id = %session.session_id, attempt = total_attempts, error = %err, "number acquisition attempt exhausted its transport retry budget");
                    continue;
                }
            };

            if tier3 {
                number_checks += 1;
            }

            if self.is_forbidden_prefix(&acquisition.phone_number) {
                tracing::info!(session_id = %session.session_id, phone = %acquisition.phone_number, "forbidden prefix; rejecting number");
                let _ = provider.cancel(&acquisition.provider_request_id).await;
                continue;
            }

            match self
                .platform_probe
                .is_number_registered(&acquisition.phone_number)
                .await
            {
                Ok(false) => {
                    let updated = self
                        .sessions
                        .allocate(
                            &session.session_id,
                            &acquisition.phone_number,
                            &acquisition.provider_request_id,
                            acquisition.raw.clone(),
                        )
                        .await?;

                    if !updated {
                        return Err(AppError::Internal(
                            "session was not in WAITING when allocation completed".into(),
                        ));
                    }

                    // Occupancy was already reserved at `admit` time; the
                    // session simply carries it forward into ALLOCATED.
                    return self
                        .sessions
                        .get(&session.session_id)
                        .await?
                        .ok_or_else(|| AppError::Internal("session vanished after allocate".into()));
                }
                Ok(true) => {
                    tracing::info!(session_id = %session.session_id, "number already registered; rejecting");
                    let _ = provider.cancel(&acquisition.provider_request_id).await;
                    continue;
                }
                Err(err) => {
                    tracing::warn!(session_id = %session.session_id, error = %err, "registration probe ambiguous; rejecting number defensively");
                    let _ = provider.cancel(&acquisition.provider_request_id).await;
                    continue;
                }
            }
        }

        self.fail_and_refund(session).await;
        Err(AppError::UpstreamUnavailable(
            "exhausted allocation attempt budget".into(),
        ))
    }

    /// §4.I step 2: network/transport errors retry up to
    /// `config.transport_retry_budget` times with exponential backoff
    /// starting at 1s; semantic outcomes pass straight through untouched.
    async fn call_with_transport_retry(
        &self,
        provider: &dyn SmsProvider,
        carrier: &str,
    ) -> AppResult<NumberOutcome> {
        let budget = self.config.transport_retry_budget.max(1);
        let mut delay = Duration::from_secs(1);
        let mut last_err = None;

        for attempt in 0..budget {
            match provider.get_number(carrier).await {
                Ok(outcome) => return Ok(outcome),
                Err(err @ AppError::UpstreamUnavailable(_)) => {
                    last_err = Some(err);
                    if attempt + 1 < budget {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
                Err(other) => return Err(other),
            }
        }

        Err(last_err.unwrap_or_else(|| AppError::UpstreamUnavailable("unreachable".into())))
    }

    fn is_forbidden_prefix(&self, phone_number: &str) -> bool {
        self.config
            .forbidden_prefixes
            .iter()
            .any(|prefix| phone_number.starts_with(prefix.as_str()))
    }

    async fn fail_and_refund(&self, session: &RentalSession) {
        match self.sessions.fail(&session.session_id).await {
            Ok(true) => self.refund_session(&session.session_id, session.user_id, session.cost, "allocation failed").await,
            Ok(false) => {
                // Another path already moved this session out of WAITING; don't
                // double-transition, but a refund attempt is still safe (idempotent).
                self.refund_session(&session.session_id, session.user_id, session.cost, "allocation failed").await;
            }
            Err(err) => tracing::error!(session_id = %session.session_id, error = %err, "failed to mark session FAILED"),
        }

        if session.tier.is_globally_bounded() {
            self.queue.leave(&session.session_id).await;
        }
    }

    async fn refund_session(&self, session_id: &str, user_id: Uuid, amount: domain::model::Money, reason: &str) {
        let reference = reference::session_refund(session_id);
        match self
            .wallet
            .refund(
                user_id,
                amount,
                Some(&reference),
                reason,
                TransactionType::Refund,
                serde_json::json!({ "session_id": session_id }),
            )
            .await
        {
            Ok(_) => {}
            Err(err) => {
                self.audit
                    .log_urgent(
                        Some(user_id),
                        "rental.refund_failed",
                        serde_json::json!({ "session_id": session_id, "error": err.to_string() }),
                    )
                    .await
                    .ok();
            }
        }
    }

    /// `getOtp(sessionId)` — client-driven polling with a 5s global
    /// per-session throttle.
    pub async fn get_otp(&self, session_id: &str) -> AppResult<OtpResult> {
        let session = self
            .sessions
            .get(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {session_id}")))?;

        match session.status {
            SessionStatus::Completed => {
                return Ok(OtpResult::Completed(
                    session.otp_code.unwrap_or_default(),
                ))
            }
            SessionStatus::Expired => return Ok(OtpResult::Expired),
            SessionStatus::Failed => return Ok(OtpResult::Error("session failed".into())),
            SessionStatus::Waiting => {
                return Err(AppError::Validation(
                    "session has no allocated number yet".into(),
                ))
            }
            SessionStatus::Allocated => {}
        }

        if Utc::now() > session.expires_at {
            if self.sessions.expire(session_id).await? {
                if session.tier.is_globally_bounded() {
                    self.queue.leave(session_id).await;
                }
                self.refund_session(session_id, session.user_id, session.cost, "session expired")
                    .await;
            }
            return Ok(OtpResult::Expired);
        }

        if !self.throttle_allows(session_id).await {
            return Ok(OtpResult::Waiting);
        }

        let provider = self
            .providers
            .get(&session.tier)
            .ok_or_else(|| AppError::Internal(format!("no provider wired for {:?}", session.tier)))?;

        let provider_request_id = session
            .provider_request_id
            .as_deref()
            .ok_or_else(|| AppError::Internal("allocated session missing provider_request_id".into()))?;

        match provider.get_otp(provider_request_id).await {
            Ok(OtpPoll::Completed(code)) => {
                self.sessions.complete(session_id, &code).await?;
                if session.tier.is_globally_bounded() {
                    self.queue.leave(session_id).await;
                }
                Ok(OtpResult::Completed(code))
            }
            Ok(OtpPoll::Waiting) => Ok(OtpResult::Waiting),
            Ok(OtpPoll::Expired) => {
                if self.sessions.expire(session_id).await? {
                    if session.tier.is_globally_bounded() {
                        self.queue.leave(session_id).await;
                    }
                    self.refund_session(session_id, session.user_id, session.cost, "provider reported expiry")
                        .await;
                }
                Ok(OtpResult::Expired)
            }
            Ok(OtpPoll::Error { retryable, message }) => {
                if retryable {
                    Ok(OtpResult::Waiting)
                } else {
                    if self.sessions.expire(session_id).await? {
                        if session.tier.is_globally_bounded() {
                            self.queue.leave(session_id).await;
                        }
                        self.refund_session(session_id, session.user_id, session.cost, &message)
                            .await;
                    }
                    Ok(OtpResult::Expired)
                }
            }
            Err(AppError::UpstreamUnavailable(msg)) => {
                tracing::warn!(session_id, error = %msg, "otp poll transport error; treating as waiting");
                Ok(OtpResult::Waiting)
            }
            Err(other) => Err(other),
        }
    }

    async fn throttle_allows(&self, session_id: &str) -> bool {
        let now = std::time::Instant::now();
        let mut guard = self.otp_throttle.lock().await;
        match guard.get(session_id) {
            Some(&last) if now.duration_since(last) < self.config.otp_poll_min_interval => false,
            _ => {
                guard.insert(session_id.to_string(), now);
                true
            }
        }
    }

    /// §4.L: reap abandoned WAITING/ALLOCATED sessions. Driven by the
    /// server's periodic scheduler, one sweep per tick.
    pub async fn reap_expired(&self) -> AppResult<usize> {
        let now = Utc::now();
        let expired = self.sessions.list_expired(now).await?;
        let mut reaped = 0usize;

        for session in expired {
            match self.sessions.expire(&session.session_id).await {
                Ok(true) => {
                    if session.tier.is_globally_bounded() {
                        self.queue.leave(&session.session_id).await;
                    }
                    self.refund_session(
                        &session.session_id,
                        session.user_id,
                        session.cost,
                        "reaped: deadline exceeded",
                    )
                    .await;
                    self.audit
                        .log(
                            Some(session.user_id),
                            "rental.session_reaped",
                            serde_json::json!({ "session_id": session.session_id }),
                        )
                        .await
                        .ok();
                    reaped += 1;
                }
                Ok(false) => {
                    // Already transitioned by a concurrent OTP poll; the
                    // reaper's sweep is not the single writer in that race,
                    // and that's fine — refund idempotency covers it.
                }
                Err(err) => {
                    tracing::error!(session_id = %session.session_id, error = %err, "reaper failed to expire session");
                }
            }
        }

        Ok(reaped)
    }

    pub async fn list_sessions(&self, user_id: Uuid) -> AppResult<Vec<RentalSession>> {
        self.sessions.list_for_user(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_key_covers_every_tier() {
        assert_eq!(service_key(RentalTier::Tier1), "rental.tier1");
        assert_eq!(service_key(RentalTier::Tier2), "rental.tier2");
        assert_eq!(service_key(RentalTier::Tier3), "rental.tier3");
        assert_eq!(service_key(RentalTier::SecondaryPlatform), "rental.secondary_platform");
    }

    fn config_with_forbidden(prefixes: Vec<&str>) -> RentalConfig {
        RentalConfig {
            forbidden_prefixes: prefixes.into_iter().map(String::from).collect(),
            ..RentalConfig::default()
        }
    }

    #[test]
    fn forbidden_prefix_matches_start_of_number() {
        let config = config_with_forbidden(vec!["995"]);
        assert!(config
            .forbidden_prefixes
            .iter()
            .any(|p| "995123456".starts_with(p.as_str())));
        assert!(!config
            .forbidden_prefixes
            .iter()
            .any(|p| "84123456".starts_with(p.as_str())));
    }
}
