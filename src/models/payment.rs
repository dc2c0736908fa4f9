use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Response header carrying the encoded payment requirement on a 402.
pub const HEADER_PAYMENT_REQUIRED: &str = "Payment-Required";
/// Request header carrying the payment proof on the unlock request.
pub const HEADER_PAYMENT_SIGNATURE: &str = "Payment-Signature";
/// Request header carrying the settlement transaction hash, when one exists.
pub const HEADER_PAYMENT_TX: &str = "X-Payment";
/// Response header carrying the encoded settlement receipt.
pub const HEADER_PAYMENT_RESPONSE: &str = "Payment-Response";
/// Fallback name some servers use for the settlement receipt header.
pub const HEADER_PAYMENT_RESPONSE_FALLBACK: &str = "X-Payment-Response";

/// Reserved proof value the demo/mock payment path stamps on receipts.
/// Receipts carrying it are simulated and never enter real history.
pub const MOCK_PROOF: &str = "mock-proof";
/// Signature accepted by demo resource servers in place of a real payment.
pub const MOCK_SIGNATURE: &str = "mock-signature";

/// One acceptable way to pay for a resource, after normalization.
///
/// `amount` is always a human-scale decimal string and `asset` always a
/// symbol; the codec converts base-unit integers and contract addresses
/// before this type is constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirement {
    pub asset: String,
    pub amount: String,
    pub chain: String,
    pub recipient: String,
    pub nonce: String,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The decoded form of a `Payment-Required` header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodedPaymentRequired {
    pub version: String,
    pub requirements: Vec<PaymentRequirement>,
}

/// A "402 was just seen here" record, one per tab, owned by the freshness
/// cache. A later capture on the same tab overwrites the earlier one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentEvent {
    pub tab_id: i64,
    pub url: String,
    pub method: String,
    pub captured_at: DateTime<Utc>,
    pub request_id: String,
    pub requirement: Option<Vec<PaymentRequirement>>,
    pub raw_header: Option<String>,
}

/// A page-originated payment request awaiting operator confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPayment {
    pub tab_id: i64,
    pub requirement: PaymentRequirement,
    pub url: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A settled payment as it lands in the persisted history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptRecord {
    pub receipt_id: String,
    pub amount: String,
    pub asset: String,
    pub timestamp: DateTime<Utc>,
    pub proof: String,
    pub merchant_id: String,
    pub resource: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
}

/// Wire shape of a settlement receipt header, before merging against the
/// requirement that triggered the payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptWire {
    pub receipt_id: String,
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub asset: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    pub proof: String,
    #[serde(default)]
    pub merchant_id: Option<String>,
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub network: Option<String>,
}

/// Persisted wallet record. The private key never leaves this process
/// except through the explicit export operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletRecord {
    pub private_key: String,
    pub address: String,
    pub created_at: DateTime<Utc>,
    pub chain_id: u64,
}
