use crate::proxy::ProxyPool;
use crate::ssrf;
use domain::config::UpstreamConfig;
use domain::model::ProxyEntry;
use domain::{AppError, AppResult};
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// §4.A: one-shot upstream request description. Callers build one of these
/// per platform/SMS-provider call site.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub url: String,
    pub json: Option<Value>,
    pub headers: Vec<(String, String)>,
}

impl UpstreamRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            json: None,
            headers: Vec::new(),
        }
    }

    pub fn post(url: impl Into<String>, json: Value) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            json: Some(json),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Additional attempts beyond the initial no-proxy attempt, drawn
    /// round-robin from the active proxy set.
    pub retry_budget: Option<u32>,
    /// `true` selects the auth-endpoint timeout (15s default) instead of
    /// the data-endpoint timeout (10s default).
    pub is_auth_endpoint: bool,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    /// Multi-valued headers, preserving repeated `Set-Cookie` entries.
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

impl UpstreamResponse {
    pub fn set_cookies(&self) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("set-cookie"))
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

/// §4.A: the upstream HTTP client. Thin wrapper over a shared
/// `reqwest::Client` with one `call()` entry point and a bare-then-proxy
/// retry ladder.
#[derive(Clone)]
pub struct HttpClient {
    http: reqwest::Client,
    proxies: ProxyPool,
    config: UpstreamConfig,
}

impl HttpClient {
    pub fn new(proxies: ProxyPool, config: UpstreamConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            proxies,
            config,
        }
    }

    /// Implements the §4.A retry/failover contract: first attempt without a
    /// proxy, subsequent attempts draw round-robin from the active proxy
    /// set up to the retry budget. On `CookieExpired` we stop immediately —
    /// that error is semantic, not transport, and retrying with a different
    /// proxy cannot fix it.
    pub async fn call(&self, req: UpstreamRequest, opts: CallOptions) -> AppResult<UpstreamResponse> {
        let host = request_host(&req.url)?;
        ssrf::guard_host(&host).await?;

        let timeout = opts.timeout.unwrap_or(if opts.is_auth_endpoint {
            self.config.auth_timeout
        } else {
            self.config.data_timeout
        });

        let retry_budget = opts.retry_budget.unwrap_or(self.config.retry_budget);
        let proxy_snapshot = self.proxies.active_snapshot().await;

        let mut last_err: Option<AppError> = None;

        for attempt in 0..=retry_budget {
            let proxy = if attempt == 0 || proxy_snapshot.is_empty() {
                None
            } else {
                let idx = (attempt as usize - 1) % proxy_snapshot.len();
                Some(&proxy_snapshot[idx])
            };

            if let Some(proxy) = proxy {
                let proxy_host = proxy_host(&proxy.address)?;
                ssrf::guard_host(&proxy_host).await?;
            }

            match self.send_once(&req, proxy, timeout).await {
                Ok(response) => {
                    if let Some(proxy) = proxy {
                        self.proxies.mark_used(proxy.id).await;
                    }

                    if is_cookie_expired(&response) {
                        return Err(AppError::CookieExpired);
                    }

                    return Ok(response);
                }
                Err(err) => {
                    tracing::warn!(
                        attempt,
                        proxy = ?proxy.map(|p| p.id),
                        error = %err,
                        "upstream call attempt failed"
                    );
                    if let Some(proxy) = proxy {
                        self.proxies.mark_down(proxy.id).await;
                    }
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| AppError::UpstreamUnavailable("no attempts made".into())))
    }

    async fn send_once(
        &self,
        req: &UpstreamRequest,
        proxy: Option<&ProxyEntry>,
        timeout: Duration,
    ) -> AppResult<UpstreamResponse> {
        let client = match proxy {
            None => self.http.clone(),
            Some(entry) => {
                let mut proxy = reqwest::Proxy::all(&entry.address)
                    .map_err(|e| AppError::UpstreamUnavailable(format!("bad proxy address: {e}")))?;
                if let (Some(u), Some(p)) = (&entry.username, &entry.password) {
                    proxy = proxy.basic_auth(u, p);
                }
                reqwest::Client::builder()
                    .proxy(proxy)
                    .timeout(timeout)
                    .build()
                    .map_err(|e| AppError::UpstreamUnavailable(format!("bad proxy client: {e}")))?
            }
        };

        let mut builder = client.request(req.method.clone(), &req.url).timeout(timeout);
        for (k, v) in &req.headers {
            builder = builder.header(k, v);
        }
        if let Some(json) = &req.json {
            builder = builder.json(json);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(e.to_string()))?;

        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(e.to_string()))?;

        let body: Value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}

/// §4.A: cookie-expiry detection — a non-zero platform `error` field, or an
/// HTTP 401/403, both mean "this session's cookie is no longer valid".
fn is_cookie_expired(response: &UpstreamResponse) -> bool {
    if response.status == 401 || response.status == 403 {
        return true;
    }
    match response.body.get("error") {
        Some(Value::Number(n)) => n.as_i64().map(|v| v != 0).unwrap_or(false),
        _ => false,
    }
}

fn request_host(url: &str) -> AppResult<String> {
    let parsed = Url::parse(url).map_err(|e| AppError::Validation(format!("invalid url: {e}")))?;
    parsed
        .host_str()
        .map(str::to_string)
        .ok_or_else(|| AppError::Validation("url has no host".into()))
}

fn proxy_host(address: &str) -> AppResult<String> {
    // Proxy addresses may be bare host:port or a full scheme://host:port URL.
    if let Ok(parsed) = Url::parse(address) {
        if let Some(host) = parsed.host_str() {
            return Ok(host.to_string());
        }
    }
    address
        .split(':')
        .next()
        .map(str::to_string)
        .ok_or_else(|| AppError::Validation(format!("invalid proxy address: {address}")))
}
