use base64::{engine::general_purpose::STANDARD, Engine as _};
use percent_encoding::percent_decode_str;
use serde_json::Value;

/// Peels the transport layers off a payment header value: surrounding
/// quotes, base64url, and one optional percent-encoding of the whole value.
/// Returns the inner JSON object, or `None` for anything malformed — the
/// value is server-controlled and must never take the engine down.
pub fn decode_payload(raw: &str) -> Option<Value> {
    let cleaned = strip_quotes(raw.trim());
    if let Some(value) = parse_layer(cleaned) {
        return Some(value);
    }
    // Retry once for values that were percent-escaped in transit.
    if cleaned.contains('%') {
        let unescaped = percent_decode_str(cleaned).decode_utf8().ok()?;
        return parse_layer(strip_quotes(unescaped.trim()));
    }
    None
}

fn parse_layer(text: &str) -> Option<Value> {
    if text.starts_with('{') {
        return serde_json::from_str::<Value>(text)
            .ok()
            .filter(Value::is_object);
    }
    let bytes = decode_base64url(text)?;
    let decoded = String::from_utf8(bytes).ok()?;
    serde_json::from_str::<Value>(decoded.trim())
        .ok()
        .filter(Value::is_object)
}

// Accepts both the `-_` and `+/` alphabets, with or without padding.
fn decode_base64url(text: &str) -> Option<Vec<u8>> {
    if text.is_empty() {
        return None;
    }
    let mut normalized: String = text
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            c => c,
        })
        .collect();
    while normalized.len() % 4 != 0 {
        normalized.push('=');
    }
    STANDARD.decode(normalized).ok()
}

fn strip_quotes(text: &str) -> &str {
    let bytes = text.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && (first == b'"' || first == b'\'') {
            return &text[1..text.len() - 1];
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    #[test]
    fn decodes_plain_json_without_base64_attempt() {
        let value = decode_payload(r#"{"version":"0.1","accepts":[{}]}"#).unwrap();
        assert_eq!(value["version"], "0.1");
    }

    #[test]
    fn decodes_base64_standard_alphabet() {
        let encoded = STANDARD.encode(r#"{"accepts":[]}"#);
        let value = decode_payload(&encoded).unwrap();
        assert!(value["accepts"].is_array());
    }

    #[test]
    fn decodes_base64url_without_padding() {
        let encoded = URL_SAFE_NO_PAD.encode(r#"{"a":"?>~"}"#);
        assert!(!encoded.contains('='));
        let value = decode_payload(&encoded).unwrap();
        assert_eq!(value["a"], "?>~");
    }

    #[test]
    fn strips_one_quote_layer() {
        let encoded = format!("\"{}\"", STANDARD.encode(r#"{"a":1}"#));
        let value = decode_payload(&encoded).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn percent_decodes_and_retries() {
        // A quoted JSON payload that was percent-escaped as a whole.
        let raw = "%7B%22a%22%3A%22b%22%7D";
        let value = decode_payload(raw).unwrap();
        assert_eq!(value["a"], "b");
    }

    #[test]
    fn malformed_input_is_absent_not_fatal() {
        for raw in ["", "not json", "0x1234", "%%%%", "\"\"", "{broken", "e30"] {
            // "e30" is base64 for "{}" which IS an object; everything else fails.
            let _ = decode_payload(raw);
        }
        assert!(decode_payload("not base64 or json").is_none());
        assert!(decode_payload("{broken").is_none());
        assert!(decode_payload("WyJub3Qgb2JqZWN0Il0=").is_none()); // JSON array
    }
}
