use domain::config::ThrottleConfig;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum RateLimitDecision {
    Allowed,
    Rejected { retry_after: Duration },
}

#[derive(Default)]
struct WindowState {
    timestamps: VecDeque<Instant>,
    cooldown_until: Option<Instant>,
}

/// §4.F: per-(user, service) sliding-window anti-spam. Process-local map
/// under a mutex per key, as spec §5 allows — "reset on restart is
/// acceptable".
#[derive(Clone)]
pub struct RateLimiter {
    config: ThrottleConfig,
    windows: Arc<Mutex<HashMap<(Uuid, String), WindowState>>>,
}

impl RateLimiter {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn check(&self, user_id: Uuid, service_key: &str) -> RateLimitDecision {
        let now = Instant::now();
        let mut guard = self.windows.lock().await;
        let state = guard
            .entry((user_id, service_key.to_string()))
            .or_default();

        if let Some(until) = state.cooldown_until {
            if until > now {
                return RateLimitDecision::Rejected {
                    retry_after: until - now,
                };
            }
        }

        while let Some(&front) = state.timestamps.front() {
            if now.duration_since(front) > self.config.rate_limit_window {
                state.timestamps.pop_front();
            } else {
                break;
            }
        }

        state.timestamps.push_back(now);

        if state.timestamps.len() as u32 > self.config.rate_limit_threshold {
            let until = now + self.config.rate_limit_cooldown;
            state.cooldown_until = Some(until);
            return RateLimitDecision::Rejected {
                retry_after: self.config.rate_limit_cooldown,
            };
        }

        RateLimitDecision::Allowed
    }
}

/// Formats a duration as the human-readable remaining time spec §4.F
/// requires in the rejection payload.
pub fn format_remaining(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{secs} giây")
    } else {
        format!("{} phút {} giây", secs / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_up_to_threshold_then_cools_down() {
        let mut config = ThrottleConfig::default();
        config.rate_limit_threshold = 3;
        let limiter = RateLimiter::new(config);
        let user = Uuid::new_v4();

        for _ in 0..3 {
            assert!(matches!(
                limiter.check(user, "svc").await,
                RateLimitDecision::Allowed
            ));
        }

        assert!(matches!(
            limiter.check(user, "svc").await,
            RateLimitDecision::Rejected { .. }
        ));
    }

    #[tokio::test]
    async fn separate_services_do_not_share_a_window() {
        let mut config = ThrottleConfig::default();
        config.rate_limit_threshold = 1;
        let limiter = RateLimiter::new(config);
        let user = Uuid::new_v4();

        assert!(matches!(
            limiter.check(user, "svc-a").await,
            RateLimitDecision::Allowed
        ));
        assert!(matches!(
            limiter.check(user, "svc-b").await,
            RateLimitDecision::Allowed
        ));
    }
}
