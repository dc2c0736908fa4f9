use crate::models::PaymentRequirement;
use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};

const DEFAULT_DECIMALS: u32 = 6;
const REQUIREMENT_TTL_MINUTES: i64 = 10;

/// Testnet chain-id substrings rewritten to canonical names.
const TESTNET_CHAINS: &[(&str, &str)] = &[("84532", "base-sepolia")];

/// Alias-resolved view of one `accepts` entry. Servers disagree on field
/// names (`payTo`/`pay_to`/`pay_to_address`, `network`/`chain_id`), so the
/// aliases collapse here before any shape matcher runs.
struct AcceptFields {
    asset: Option<String>,
    amount: Option<String>,
    price: Option<String>,
    recipient: Option<String>,
    pay_to: Option<String>,
    chain: Option<String>,
    network: Option<String>,
    nonce: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    decimals: u32,
    description: Option<String>,
}

/// Pre-normalization output of a shape matcher.
struct Draft {
    asset: String,
    amount: String,
    recipient: String,
    chain: String,
}

type ShapeMatcher = fn(&AcceptFields) -> Option<Draft>;

/// Ordered shape matchers; the first match wins. Adding a shape is a new
/// entry here, not a rewrite of the normalization.
const SHAPES: &[(&str, ShapeMatcher)] = &[
    ("native", native_shape),
    ("price", price_shape),
    ("hybrid", hybrid_shape),
];

/// Normalizes one accepted payment option. Options matching no known shape
/// are dropped (`None`), never fatal.
pub fn normalize_accept(
    value: &Value,
    resource_description: Option<&str>,
    now: DateTime<Utc>,
) -> Option<PaymentRequirement> {
    let fields = accept_fields(value)?;

    let draft = SHAPES.iter().find_map(|(name, matcher)| {
        let draft = matcher(&fields)?;
        tracing::trace!(shape = name, "accept option matched");
        Some(draft)
    })?;

    Some(PaymentRequirement {
        asset: draft.asset,
        amount: draft.amount,
        chain: normalize_chain(&draft.chain),
        recipient: draft.recipient,
        nonce: fields
            .nonce
            .unwrap_or_else(|| format!("x402-{}", now.timestamp_millis())),
        expires_at: fields
            .expires_at
            .unwrap_or_else(|| now + Duration::minutes(REQUIREMENT_TTL_MINUTES)),
        description: fields
            .description
            .or_else(|| resource_description.map(str::to_string)),
    })
}

// `asset`/`amount` under their own names, recipient and chain likewise.
fn native_shape(f: &AcceptFields) -> Option<Draft> {
    let (asset, amount) = settle_asset_amount(f)?;
    Some(Draft {
        asset,
        amount,
        recipient: f.recipient.clone()?,
        chain: f.chain.clone().or_else(|| f.network.clone())?,
    })
}

// `price` with `payTo`/`network`; the asset is always USDC.
fn price_shape(f: &AcceptFields) -> Option<Draft> {
    let price = f.price.clone()?;
    Some(Draft {
        asset: "USDC".to_string(),
        amount: price.trim().trim_start_matches('$').to_string(),
        recipient: f.pay_to.clone()?,
        chain: f.network.clone()?,
    })
}

// Native asset/amount combined with the price shape's addressing fields.
fn hybrid_shape(f: &AcceptFields) -> Option<Draft> {
    let (asset, amount) = settle_asset_amount(f)?;
    Some(Draft {
        asset,
        amount,
        recipient: f.pay_to.clone()?,
        chain: f.network.clone().or_else(|| f.chain.clone())?,
    })
}

// A contract-address asset means the amount is a base-unit integer; both
// are rewritten to the human-scale form.
fn settle_asset_amount(f: &AcceptFields) -> Option<(String, String)> {
    let asset = f.asset.clone()?;
    let amount = f.amount.clone()?;
    if is_hex_address(&asset) {
        Some(("USDC".to_string(), base_units_to_decimal(&amount, f.decimals)))
    } else {
        Some((asset, amount))
    }
}

fn accept_fields(value: &Value) -> Option<AcceptFields> {
    let map = value.as_object()?;
    Some(AcceptFields {
        asset: string_field(map, "asset"),
        amount: string_field(map, "amount"),
        price: string_field(map, "price"),
        recipient: string_field(map, "recipient"),
        pay_to: string_field(map, "payTo")
            .or_else(|| string_field(map, "pay_to"))
            .or_else(|| string_field(map, "pay_to_address")),
        chain: string_field(map, "chain"),
        network: string_field(map, "network").or_else(|| string_field(map, "chain_id")),
        nonce: string_field(map, "nonce"),
        expires_at: string_field(map, "expiresAt").and_then(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        }),
        decimals: map
            .get("extra")
            .and_then(|e| e.get("decimals"))
            .and_then(Value::as_u64)
            .map(|d| d as u32)
            .unwrap_or(DEFAULT_DECIMALS),
        description: string_field(map, "description"),
    })
}

// Field values arrive as strings or numbers depending on the server.
fn string_field(map: &Map<String, Value>, name: &str) -> Option<String> {
    match map.get(name)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn is_hex_address(asset: &str) -> bool {
    asset
        .strip_prefix("0x")
        .map(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_hexdigit()))
        .unwrap_or(false)
}

/// Rewrites chain values containing a known testnet chain id to the
/// canonical human-readable name.
pub fn normalize_chain(chain: &str) -> String {
    testnet_name(chain)
        .map(str::to_string)
        .unwrap_or_else(|| chain.to_string())
}

/// Canonical name for a value containing a known testnet chain id, if any.
pub fn testnet_name(chain: &str) -> Option<&'static str> {
    TESTNET_CHAINS
        .iter()
        .find(|(id, name)| chain.contains(id) || chain == *name)
        .map(|(_, name)| *name)
}

/// Converts a base-unit integer string to a human-scale decimal string:
/// "1500000" with 6 decimals becomes "1.5". Non-integer input is returned
/// unchanged rather than mangled.
pub fn base_units_to_decimal(raw: &str, decimals: u32) -> String {
    let raw = raw.trim();
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return raw.to_string();
    }
    let significant = raw.trim_start_matches('0');
    let significant = if significant.is_empty() { "0" } else { significant };

    let width = decimals as usize + 1;
    let padded = format!("{:0>width$}", significant, width = width);
    let (int_part, frac_part) = padded.split_at(padded.len() - decimals as usize);
    let frac_part = frac_part.trim_end_matches('0');

    if frac_part.is_empty() {
        int_part.to_string()
    } else {
        format!("{}.{}", int_part, frac_part)
    }
}
