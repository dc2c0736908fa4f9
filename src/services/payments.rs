use crate::codec;
use crate::error::AgentError;
use crate::models::{
    PaymentRequirement, ReceiptRecord, ReceiptWire, HEADER_PAYMENT_RESPONSE,
    HEADER_PAYMENT_RESPONSE_FALLBACK,
};
use crate::services::ProtocolClient;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

/// Amount assumed for a testnet receipt when neither the receipt nor the
/// requirement carries one. Last-resort only.
const DEMO_FALLBACK_AMOUNT: &str = "0.001";

#[derive(Debug, Clone)]
pub struct Settlement {
    pub receipt: ReceiptRecord,
    pub body: Option<Value>,
}

/// The asynchronous half of a payment attempt. Wallet and cooldown guards
/// run inside the engine turn that spawns this, so by the time `settle`
/// executes the attempt is already committed.
pub struct PaymentPipeline {
    client: Arc<dyn ProtocolClient>,
}

impl PaymentPipeline {
    pub fn new(client: Arc<dyn ProtocolClient>) -> Self {
        Self { client }
    }

    pub async fn settle(
        &self,
        requirement: &PaymentRequirement,
        url: &str,
        method: &str,
    ) -> Result<Settlement, AgentError> {
        let response = self
            .client
            .request_with_payment(url, method, requirement)
            .await
            .map_err(AgentError::reclassified)?;

        if !(200..300).contains(&response.status) {
            return Err(AgentError::UnlockRejected(response.status));
        }

        let raw_receipt = response
            .header(HEADER_PAYMENT_RESPONSE)
            .or_else(|| response.header(HEADER_PAYMENT_RESPONSE_FALLBACK))
            .ok_or(AgentError::MissingReceipt)?;
        let wire = codec::decode_payment_response(raw_receipt).ok_or(AgentError::MissingReceipt)?;

        let receipt = merge_receipt(wire, requirement, url, Utc::now());
        tracing::info!(
            receipt_id = %receipt.receipt_id,
            amount = %receipt.amount,
            "payment settled"
        );

        // The body is a best-effort extra for the caller; a parse failure
        // is not an error.
        let body = response
            .body
            .as_deref()
            .and_then(|text| serde_json::from_str(text).ok());

        Ok(Settlement { receipt, body })
    }
}

// Fields the receipt omits are backfilled from the requirement that
// triggered the payment.
fn merge_receipt(
    wire: ReceiptWire,
    requirement: &PaymentRequirement,
    url: &str,
    now: DateTime<Utc>,
) -> ReceiptRecord {
    let network = wire.network.clone();

    let amount = wire
        .amount
        .filter(|a| !a.is_empty())
        .or_else(|| {
            if requirement.amount.is_empty() {
                None
            } else {
                Some(requirement.amount.clone())
            }
        })
        .or_else(|| {
            network
                .as_deref()
                .and_then(codec::shape::testnet_name)
                .map(|_| DEMO_FALLBACK_AMOUNT.to_string())
        })
        .unwrap_or_else(|| "0".to_string());

    let asset = wire
        .asset
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| requirement.asset.clone());

    ReceiptRecord {
        receipt_id: wire.receipt_id,
        amount,
        asset,
        timestamp: wire
            .timestamp
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(now),
        proof: wire.proof,
        merchant_id: wire
            .merchant_id
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| requirement.recipient.clone()),
        resource: wire.resource.unwrap_or_else(|| url.to_string()),
        url: url.to_string(),
        description: requirement.description.clone(),
        success: Some(true),
    }
}
