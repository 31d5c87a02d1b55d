use async_trait::async_trait;
use domain::model::{Money, RentalTier};
use domain::AppResult;
use serde_json::Value;
use upstream::{CallOptions, HttpClient, UpstreamRequest};

/// Successful number acquisition, carrying the opaque provider response
/// blob verbatim (spec §3: `RentalSession.providerResponse`).
#[derive(Debug, Clone)]
pub struct NumberAcquisition {
    pub phone_number: String,
    pub provider_request_id: String,
    pub raw: Value,
}

/// §4.I step 1: "on insufficient provider balance abort immediately (no
/// retry)" is a distinct outcome from a transport error, which IS retried.
/// Modeling it as an `Ok` variant (rather than a third error type) keeps
/// the orchestrator's retry loop a plain match on one `Result`.
#[derive(Debug, Clone)]
pub enum NumberOutcome {
    Allocated(NumberAcquisition),
    InsufficientProviderBalance,
}

#[derive(Debug, Clone)]
pub enum OtpPoll {
    Waiting,
    Completed(String),
    /// Provider-reported terminal expiry (distinct from our own 6-minute deadline).
    Expired,
    Error { retryable: bool, message: String },
}

/// §4.I / §9: "dynamic-dispatch-on-string-provider" becomes a capability
/// interface, one implementation per provider, closed over `RentalTier`.
#[async_trait]
pub trait SmsProvider: Send + Sync {
    fn id(&self) -> RentalTier;
    async fn get_number(&self, carrier: &str) -> AppResult<NumberOutcome>;
    async fn get_otp(&self, provider_request_id: &str) -> AppResult<OtpPoll>;
    /// Not every provider exposes cancellation; default is a no-op.
    async fn cancel(&self, _provider_request_id: &str) -> AppResult<()> {
        Ok(())
    }
    async fn balance(&self) -> AppResult<Money>;
}

fn insufficient_balance_message(body: &Value) -> bool {
    body.get("message")
        .and_then(Value::as_str)
        .map(|m| m.contains("số dư không đủ") || m.to_lowercase().contains("insufficient"))
        .unwrap_or(false)
}

/// Tier 1: carrier selector is a plain enum string (e.g. `"viettel"`).
pub struct Tier1Provider {
    http: HttpClient,
    base_url: String,
}

impl Tier1Provider {
    pub fn new(http: HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl SmsProvider for Tier1Provider {
    fn id(&self) -> RentalTier {
        RentalTier::Tier1
    }

    async fn get_number(&self, carrier: &str) -> AppResult<NumberOutcome> {
        let req = UpstreamRequest::post(
            format!("{}/getNumber", self.base_url),
            serde_json::json!({ "carrier": carrier }),
        );
        let resp = self.http.call(req, CallOptions::default()).await?;

        if insufficient_balance_message(&resp.body) {
            return Ok(NumberOutcome::InsufficientProviderBalance);
        }

        let phone_number = resp
            .body
            .get("phone_number")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let provider_request_id = resp
            .body
            .get("request_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(NumberOutcome::Allocated(NumberAcquisition {
            phone_number,
            provider_request_id,
            raw: resp.body,
        }))
    }

    async fn get_otp(&self, provider_request_id: &str) -> AppResult<OtpPoll> {
        let req = UpstreamRequest::get(format!(
            "{}/getOtp?request_id={}",
            self.base_url, provider_request_id
        ));
        let resp = self.http.call(req, CallOptions::default()).await?;
        Ok(parse_otp_state(&resp.body))
    }

    async fn cancel(&self, provider_request_id: &str) -> AppResult<()> {
        let req = UpstreamRequest::post(
            format!("{}/cancel", self.base_url),
            serde_json::json!({ "request_id": provider_request_id }),
        );
        self.http.call(req, CallOptions::default()).await?;
        Ok(())
    }

    async fn balance(&self) -> AppResult<Money> {
        let req = UpstreamRequest::get(format!("{}/balance", self.base_url));
        let resp = self.http.call(req, CallOptions::default()).await?;
        Ok(resp.body.get("balance").and_then(Value::as_i64).unwrap_or(0))
    }
}

/// Tier 2: carrier selector is a numeric id.
pub struct Tier2Provider {
    http: HttpClient,
    base_url: String,
}

impl Tier2Provider {
    pub fn new(http: HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl SmsProvider for Tier2Provider {
    fn id(&self) -> RentalTier {
        RentalTier::Tier2
    }

    async fn get_number(&self, carrier: &str) -> AppResult<NumberOutcome> {
        let carrier_id: u32 = carrier.parse().unwrap_or(0);
        let req = UpstreamRequest::post(
            format!("{}/api/getNumber", self.base_url),
            serde_json::json!({ "carrierId": carrier_id }),
        );
        let resp = self.http.call(req, CallOptions::default()).await?;

        if insufficient_balance_message(&resp.body) {
            return Ok(NumberOutcome::InsufficientProviderBalance);
        }

        let phone_number = resp
            .body
            .get("number")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let provider_request_id = resp
            .body
            .get("id")
            .map(|v| v.to_string())
            .unwrap_or_default();

        Ok(NumberOutcome::Allocated(NumberAcquisition {
            phone_number,
            provider_request_id,
            raw: resp.body,
        }))
    }

    async fn get_otp(&self, provider_request_id: &str) -> AppResult<OtpPoll> {
        let req = UpstreamRequest::get(format!(
            "{}/api/getOtp?id={}",
            self.base_url, provider_request_id
        ));
        let resp = self.http.call(req, CallOptions::default()).await?;
        Ok(parse_otp_state(&resp.body))
    }

    async fn balance(&self) -> AppResult<Money> {
        let req = UpstreamRequest::get(format!("{}/api/balance", self.base_url));
        let resp = self.http.call(req, CallOptions::default()).await?;
        Ok(resp.body.get("balance").and_then(Value::as_i64).unwrap_or(0))
    }
}

/// Tier 3: carrier selector is a bit-flag mask, and it additionally has the
/// "number checks" sub-budget (spec §4.I: "for tier 3 additionally bounded
/// by 3 number checks").
pub struct Tier3Provider {
    http: HttpClient,
    base_url: String,
}

impl Tier3Provider {
    pub fn new(http: HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl SmsProvider for Tier3Provider {
    fn id(&self) -> RentalTier {
        RentalTier::Tier3
    }

    async fn get_number(&self, carrier: &str) -> AppResult<NumberOutcome> {
        let flags: u32 = carrier.parse().unwrap_or(0);
        let req = UpstreamRequest::post(
            format!("{}/v2/number", self.base_url),
            serde_json::json!({ "carrierFlags": flags }),
        );
        let resp = self.http.call(req, CallOptions::default()).await?;

        if insufficient_balance_message(&resp.body) {
            return Ok(NumberOutcome::InsufficientProviderBalance);
        }

        let phone_number = resp
            .body
            .get("phone")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let provider_request_id = resp
            .body
            .get("orderId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(NumberOutcome::Allocated(NumberAcquisition {
            phone_number,
            provider_request_id,
            raw: resp.body,
        }))
    }

    async fn get_otp(&self, provider_request_id: &str) -> AppResult<OtpPoll> {
        let req = UpstreamRequest::get(format!(
            "{}/v2/otp/{}",
            self.base_url, provider_request_id
        ));
        let resp = self.http.call(req, CallOptions::default()).await?;
        Ok(parse_otp_state(&resp.body))
    }

    async fn cancel(&self, provider_request_id: &str) -> AppResult<()> {
        let req = UpstreamRequest::post(
            format!("{}/v2/cancel", self.base_url),
            serde_json::json!({ "orderId": provider_request_id }),
        );
        self.http.call(req, CallOptions::default()).await?;
        Ok(())
    }

    async fn balance(&self) -> AppResult<Money> {
        let req = UpstreamRequest::get(format!("{}/v2/balance", self.base_url));
        let resp = self.http.call(req, CallOptions::default()).await?;
        Ok(resp.body.get("balance").and_then(Value::as_i64).unwrap_or(0))
    }
}

/// Secondary platform tier: the e-commerce platform itself acts as a
/// fourth "provider" for number rental purposes.
pub struct SecondaryPlatformProvider {
    http: HttpClient,
    base_url: String,
}

impl SecondaryPlatformProvider {
    pub fn new(http: HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl SmsProvider for SecondaryPlatformProvider {
    fn id(&self) -> RentalTier {
        RentalTier::SecondaryPlatform
    }

    async fn get_number(&self, carrier: &str) -> AppResult<NumberOutcome> {
        let req = UpstreamRequest::post(
            format!("{}/platform/rent", self.base_url),
            serde_json::json!({ "carrier": carrier }),
        );
        let resp = self.http.call(req, CallOptions::default()).await?;

        if insufficient_balance_message(&resp.body) {
            return Ok(NumberOutcome::InsufficientProviderBalance);
        }

        let phone_number = resp
            .body
            .get("phone_number")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let provider_request_id = resp
            .body
            .get("session")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(NumberOutcome::Allocated(NumberAcquisition {
            phone_number,
            provider_request_id,
            raw: resp.body,
        }))
    }

    async fn get_otp(&self, provider_request_id: &str) -> AppResult<OtpPoll> {
        let req = UpstreamRequest::get(format!(
            "{}/platform/otp?session={}",
            self.base_url, provider_request_id
        ));
        let resp = self.http.call(req, CallOptions::default()).await?;
        Ok(parse_otp_state(&resp.body))
    }

    async fn balance(&self) -> AppResult<Money> {
        let req = UpstreamRequest::get(format!("{}/platform/balance", self.base_url));
        let resp = self.http.call(req, CallOptions::default()).await?;
        Ok(resp.body.get("balance").and_then(Value::as_i64).unwrap_or(0))
    }
}

fn parse_otp_state(body: &Value) -> OtpPoll {
    match body.get("status").and_then(Value::as_str) {
        Some("completed") => OtpPoll::Completed(
            body.get("otp")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        ),
        Some("expired") => OtpPoll::Expired,
        Some("error") => OtpPoll::Error {
            retryable: body
                .get("retryable")
                .and_then(Value::as_bool)
                .unwrap_or(true),
            message: body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown provider error")
                .to_string(),
        },
        _ => OtpPoll::Waiting,
    }
}

/// Probe the platform to check whether a candidate number is already
/// registered (spec §4.I step 4). This is a platform call, not a
/// provider call — it shares no shape with `SmsProvider`.
pub struct PlatformProbe {
    http: HttpClient,
    base_url: String,
}

impl PlatformProbe {
    pub fn new(http: HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    /// Returns `Ok(false)` only on a clean negative (no error AND not
    /// registered); any ambiguity (transport error, platform error) should
    /// be treated by the caller as "reject this number", not as `Ok(true)`.
    pub async fn is_number_registered(&self, phone_number: &str) -> AppResult<bool> {
        let req = UpstreamRequest::post(
            format!("{}/account-check", self.base_url),
            serde_json::json!({ "phone": phone_number }),
        );
        let resp = self.http.call(req, CallOptions::default()).await?;

        let platform_error = resp.body.get("error").and_then(Value::as_i64).unwrap_or(0);
        if platform_error != 0 {
            return Err(domain::AppError::UpstreamUnavailable(format!(
                "account-check returned error {platform_error}"
            )));
        }

        Ok(resp
            .body
            .get("data")
            .and_then(|d| d.get("registered"))
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_balance_detected_from_vietnamese_message() {
        let body = serde_json::json!({ "message": "số dư không đủ để thực hiện" });
        assert!(insufficient_balance_message(&body));
    }

    #[test]
    fn insufficient_balance_detected_from_english_message() {
        let body = serde_json::json!({ "message": "Insufficient balance" });
        assert!(insufficient_balance_message(&body));
    }

    #[test]
    fn insufficient_balance_false_for_unrelated_message() {
        let body = serde_json::json!({ "message": "number not found" });
        assert!(!insufficient_balance_message(&body));
    }

    #[test]
    fn parse_otp_state_completed() {
        let body = serde_json::json!({ "status": "completed", "otp": "123456" });
        match parse_otp_state(&body) {
            OtpPoll::Completed(otp) => assert_eq!(otp, "123456"),
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[test]
    fn parse_otp_state_defaults_to_waiting() {
        let body = serde_json::json!({});
        assert!(matches!(parse_otp_state(&body), OtpPoll::Waiting));
    }

    #[test]
    fn parse_otp_state_error_carries_retryable_flag() {
        let body = serde_json::json!({ "status": "error", "retryable": false, "message": "blocked" });
        match parse_otp_state(&body) {
            OtpPoll::Error { retryable, message } => {
                assert!(!retryable);
                assert_eq!(message, "blocked");
            }
            other => panic!("expected Error, got {other:?}"),
        }
    }
}
