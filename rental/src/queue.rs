use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmitDecision {
    Allowed,
    DenyGlobal { next_slot_estimate: Duration },
    DenyUser { wait: Duration },
}

struct QueueState {
    /// Session ids currently occupying a slot of the bounded tier.
    occupants: HashSet<String>,
    last_attempt: HashMap<Uuid, Instant>,
}

/// §4.G: the one system-wide cap on concurrent sessions of the bounded
/// rental tier, plus a per-user minimum interval between attempts. A
/// single module-level structure under a mutex, as spec §5 requires
/// ("admit/leave MUST be atomic").
#[derive(Clone)]
pub struct GlobalBoundedQueue {
    cap: usize,
    min_interval: Duration,
    state: Arc<Mutex<QueueState>>,
}

impl GlobalBoundedQueue {
    pub fn new(cap: usize, min_interval: Duration) -> Self {
        Self {
            cap,
            min_interval,
            state: Arc::new(Mutex::new(QueueState {
                occupants: HashSet::new(),
                last_attempt: HashMap::new(),
            })),
        }
    }

    /// MUST be consulted before any charge for the bounded tier (spec §4.G).
    /// Reserves `session_id`'s occupancy slot atomically with the admission
    /// check — a session counts against the cap from admission through
    /// WAITING until it leaves via `leave` (failure, expiry or completion),
    /// not just while ALLOCATED.
    pub async fn admit(&self, user_id: Uuid, session_id: &str) -> AdmitDecision {
        let now = Instant::now();
        let mut guard = self.state.lock().await;

        if let Some(&last) = guard.last_attempt.get(&user_id) {
            let elapsed = now.duration_since(last);
            if elapsed < self.min_interval {
                return AdmitDecision::DenyUser {
                    wait: self.min_interval - elapsed,
                };
            }
        }

        if guard.occupants.len() >= self.cap {
            // Heuristic estimate, not a promise: we don't track per-slot
            // expiry here (the session store does). A fixed guess keeps
            // the contract simple for callers that just want to back off.
            return AdmitDecision::DenyGlobal {
                next_slot_estimate: Duration::from_secs(30),
            };
        }

        guard.last_attempt.insert(user_id, now);
        guard.occupants.insert(session_id.to_string());
        AdmitDecision::Allowed
    }

    /// Releases a session's reserved slot. MUST be called on every exit
    /// path once `admit` has returned `Allowed` for it: allocation failure,
    /// expiry, and normal completion alike.
    pub async fn leave(&self, session_id: &str) {
        let mut guard = self.state.lock().await;
        guard.occupants.remove(session_id);
    }

    pub async fn occupancy(&self) -> usize {
        self.state.lock().await.occupants.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enforces_global_cap() {
        let queue = GlobalBoundedQueue::new(2, Duration::from_millis(0));
        assert_eq!(queue.admit(Uuid::new_v4(), "s1").await, AdmitDecision::Allowed);
        assert_eq!(queue.admit(Uuid::new_v4(), "s2").await, AdmitDecision::Allowed);

        let decision = queue.admit(Uuid::new_v4(), "s3").await;
        assert_eq!(
            decision,
            AdmitDecision::DenyGlobal {
                next_slot_estimate: Duration::from_secs(30)
            }
        );

        queue.leave("s1").await;
        let decision = queue.admit(Uuid::new_v4(), "s3").await;
        assert_eq!(decision, AdmitDecision::Allowed);
    }

    #[tokio::test]
    async fn enforces_per_user_min_interval() {
        let queue = GlobalBoundedQueue::new(100, Duration::from_secs(2));
        let user = Uuid::new_v4();
        assert_eq!(queue.admit(user, "s1").await, AdmitDecision::Allowed);
        assert!(matches!(
            queue.admit(user, "s2").await,
            AdmitDecision::DenyUser { .. }
        ));
    }

    #[tokio::test]
    async fn admit_reserves_occupancy_immediately() {
        let queue = GlobalBoundedQueue::new(1, Duration::from_millis(0));
        assert_eq!(queue.admit(Uuid::new_v4(), "waiting").await, AdmitDecision::Allowed);
        assert_eq!(queue.occupancy().await, 1);

        // A second user is denied while the first is still WAITING, not yet
        // ALLOCATED — occupancy was reserved at admit time.
        assert!(matches!(
            queue.admit(Uuid::new_v4(), "other").await,
            AdmitDecision::DenyGlobal { .. }
        ));
    }
}
