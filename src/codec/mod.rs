pub mod shape;
pub mod transport;

use crate::models::{DecodedPaymentRequired, ReceiptWire};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

pub use shape::{base_units_to_decimal, normalize_accept, normalize_chain};

/// Decodes a `Payment-Required` header value into its normalized form.
/// Returns `None` for anything malformed; never errors.
pub fn decode_payment_required(raw: &str) -> Option<DecodedPaymentRequired> {
    decode_payment_required_at(raw, Utc::now())
}

/// Same as [`decode_payment_required`] with an explicit clock, so synthesized
/// nonces and expiries are deterministic under test.
pub fn decode_payment_required_at(
    raw: &str,
    now: DateTime<Utc>,
) -> Option<DecodedPaymentRequired> {
    let value = transport::decode_payload(raw)?;
    let obj = value.as_object()?;

    let accepts = obj.get("accepts")?.as_array()?;
    if accepts.is_empty() {
        return None;
    }

    let resource_description = obj
        .get("resource")
        .and_then(|r| r.get("description"))
        .and_then(Value::as_str);

    let requirements = accepts
        .iter()
        .filter_map(|accept| shape::normalize_accept(accept, resource_description, now))
        .collect();

    Some(DecodedPaymentRequired {
        version: obj
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or("0.1")
            .to_string(),
        requirements,
    })
}

/// Decodes a `Payment-Response` header value. Same transport layers as the
/// requirement header, but the receipt is a flat record with no shapes.
pub fn decode_payment_response(raw: &str) -> Option<ReceiptWire> {
    let value = transport::decode_payload(raw)?;
    serde_json::from_value(value).ok()
}

/// Encodes a decoded requirement back to a base64url header value.
pub fn encode_payment_required(decoded: &DecodedPaymentRequired) -> String {
    let payload = json!({
        "version": decoded.version,
        "accepts": decoded.requirements,
    });
    URL_SAFE_NO_PAD.encode(payload.to_string())
}
