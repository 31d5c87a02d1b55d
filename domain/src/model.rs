use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Amounts are integer VND (spec §3: "no fractional units").
pub type Money = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
    Superadmin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub role: Role,
    pub active: bool,
    pub balance: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Charge,
    Refund,
    Credit,
    Debit,
    RentalCharge,
    VoucherCharge,
    RapidCharge,
    AdminAdjust,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    /// Signed: positive for credit/refund, negative for charge/debit.
    pub amount: Money,
    pub reference: Option<String>,
    pub status: TransactionStatus,
    pub balance_before: Money,
    pub balance_after: Money,
    pub created_at: DateTime<Utc>,
    pub description: String,
}

/// One of the three SMS-provider-backed rental offerings, plus the
/// secondary platform tier (see GLOSSARY: Tier).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RentalTier {
    Tier1,
    Tier2,
    Tier3,
    SecondaryPlatform,
}

impl RentalTier {
    /// §4.G's global bounded queue applies to exactly one tier.
    pub fn is_globally_bounded(self) -> bool {
        matches!(self, RentalTier::Tier3)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Waiting,
    Allocated,
    Completed,
    Expired,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RentalSession {
    pub session_id: String,
    pub user_id: Uuid,
    pub tier: RentalTier,
    pub carrier: String,
    pub phone_number: Option<String>,
    pub provider_request_id: Option<String>,
    pub status: SessionStatus,
    pub start_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub otp_code: Option<String>,
    pub cost: Money,
    pub provider_response: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoucherOperationStatus {
    Pending,
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoucherOperation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub session_id: String,
    pub cookie_preview: String,
    pub status: VoucherOperationStatus,
    pub total_found: u32,
    pub successful_saves: u32,
    pub failed_saves: u32,
    pub charge_transaction_id: Uuid,
    pub refund_transaction_id: Option<Uuid>,
}

/// One row per claim attempt against a candidate voucher (persisted table
/// `voucher_save_results`, spec §6 persisted state layout).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoucherSaveResult {
    pub id: Uuid,
    pub operation_id: Uuid,
    pub voucher_code: String,
    pub is_primary_target: bool,
    pub attempt_number: u32,
    pub success: bool,
    pub error_code: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RapidOrder {
    pub order_id: String,
    pub final_total: Option<i64>,
    pub driver_phone: Option<String>,
    pub driver_name: Option<String>,
    pub vehicle_plate: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RapidCheck {
    pub id: Uuid,
    pub user_id: Uuid,
    pub cookie_preview: String,
    pub cookie_fingerprint: String,
    pub status: bool,
    pub driver_phone: Option<String>,
    pub driver_name: Option<String>,
    pub vehicle_plate: Option<String>,
    pub orders: Vec<RapidOrder>,
    pub created_at: DateTime<Utc>,
    pub charge_transaction_id: Uuid,
    pub refund_transaction_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicePrice {
    pub service_key: String,
    pub price: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyEntry {
    pub id: Uuid,
    pub address: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub active: bool,
    pub last_used: Option<DateTime<Utc>>,
    pub usage_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub transaction_id: Uuid,
    pub result_fingerprint: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    Info,
    Urgent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub kind: String,
    pub severity: AuditSeverity,
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Deterministic reference builders, so every caller derives the same
/// idempotency key for the same logical event (spec §4.I refund discipline,
/// §4.J/§4.K refund references).
pub mod reference {
    pub fn session_charge(session_id: &str) -> String {
        format!("session:{session_id}")
    }

    pub fn session_refund(session_id: &str) -> String {
        format!("refund:{session_id}")
    }

    pub fn voucher_charge(user_id: &str, session_id: &str, cookie_id: &str) -> String {
        format!("voucher:{user_id}:{session_id}:{cookie_id}")
    }

    pub fn voucher_refund(operation_id: &str) -> String {
        format!("refund:voucher:{operation_id}")
    }

    pub fn rapid_charge(check_id: &str) -> String {
        format!("rapid:{check_id}")
    }

    pub fn rapid_refund(check_id: &str) -> String {
        format!("refund:rapid:{check_id}")
    }

    pub fn bank_deposit(bank_reference: &str) -> String {
        format!("deposit:{bank_reference}")
    }
}
