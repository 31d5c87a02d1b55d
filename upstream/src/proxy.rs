use domain::model::ProxyEntry;
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

/// §4.B: the active proxy set. A mutable list under a single lock; failover
/// iteration in `upstream::client` reads an immutable snapshot taken once
/// per call rather than re-locking per attempt.
#[derive(Clone)]
pub struct ProxyPool {
    entries: Arc<RwLock<Vec<ProxyEntry>>>,
}

impl ProxyPool {
    pub fn new(entries: Vec<ProxyEntry>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(entries)),
        }
    }

    /// An immutable snapshot of currently-active entries, for a caller to
    /// iterate over during its own retry/failover loop.
    pub async fn active_snapshot(&self) -> Vec<ProxyEntry> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|p| p.active)
            .cloned()
            .collect()
    }

    pub async fn random_active(&self) -> Option<ProxyEntry> {
        let snapshot = self.active_snapshot().await;
        snapshot.choose(&mut rand::thread_rng()).cloned()
    }

    pub async fn mark_used(&self, id: Uuid) {
        let mut guard = self.entries.write().await;
        if let Some(entry) = guard.iter_mut().find(|p| p.id == id) {
            entry.usage_count += 1;
            entry.last_used = Some(chrono::Utc::now());
        }
    }

    pub async fn mark_down(&self, id: Uuid) {
        let mut guard = self.entries.write().await;
        if let Some(entry) = guard.iter_mut().find(|p| p.id == id) {
            entry.active = false;
            tracing::warn!(proxy_id = %id, "proxy marked down");
        }
    }

    /// Admin-triggered health check (§4.B): probe every entry with a
    /// trivial request and flip `active` based on the outcome.
    pub async fn health_check_all(&self, probe_url: &str, timeout: Duration) {
        let snapshot = self.entries.read().await.clone();

        for entry in snapshot {
            let healthy = probe(&entry, probe_url, timeout).await;
            let mut guard = self.entries.write().await;
            if let Some(stored) = guard.iter_mut().find(|p| p.id == entry.id) {
                if stored.active != healthy {
                    tracing::info!(proxy_id = %entry.id, healthy, "proxy health flipped");
                }
                stored.active = healthy;
            }
        }
    }
}

async fn probe(entry: &ProxyEntry, probe_url: &str, timeout: Duration) -> bool {
    let mut builder = reqwest::Client::builder().timeout(timeout);
    if let Ok(proxy) = build_reqwest_proxy(entry) {
        builder = builder.proxy(proxy);
    } else {
        return false;
    }

    match builder.build() {
        Ok(client) => client
            .get(probe_url)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false),
        Err(_) => false,
    }
}

fn build_reqwest_proxy(entry: &ProxyEntry) -> Result<reqwest::Proxy, reqwest::Error> {
    let mut proxy = reqwest::Proxy::all(&entry.address)?;
    if let (Some(username), Some(password)) = (&entry.username, &entry.password) {
        proxy = proxy.basic_auth(username, password);
    }
    Ok(proxy)
}
