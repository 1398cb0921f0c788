//! Unverified JWT payload decoding. We only ever need the `exp` claim out
//! of a third-party bearer token we cannot verify ourselves — no
//! signature check, no key lookup.

use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Claims {
    exp: Option<i64>,
}

/// Decodes the payload segment of a `header.payload.signature` JWT and
/// returns its `exp` claim as a UTC timestamp, if present and non-zero.
pub fn decode_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload_segment = token.split('.').nth(1)?;
    let bytes = decode_segment(payload_segment)?;
    let claims: Claims = serde_json::from_slice(&bytes).ok()?;
    match claims.exp {
        Some(exp) if exp > 0 => Utc.timestamp_opt(exp, 0).single(),
        _ => None,
    }
}

fn decode_segment(segment: &str) -> Option<Vec<u8>> {
    let padded = pad_base64(segment);
    base64::engine::general_purpose::URL_SAFE
        .decode(&padded)
        .or_else(|_| base64::engine::general_purpose::STANDARD.decode(&padded))
        .ok()
}

fn pad_base64(segment: &str) -> String {
    let rem = segment.len() % 4;
    if rem == 0 {
        segment.to_string()
    } else {
        let mut s = segment.to_string();
        s.push_str(&"=".repeat(4 - rem));
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_token(payload_json: &str) -> String {
        let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(payload_json);
        format!("eyJhbGciOiJFUzI1NiJ9.{payload}.sig")
    }

    #[test]
    fn decodes_valid_exp() {
        let token = make_token(r#"{"exp":1700000000}"#);
        let decoded = decode_expiry(&token).unwrap();
        assert_eq!(decoded.timestamp(), 1700000000);
    }

    #[test]
    fn missing_exp_returns_none() {
        let token = make_token(r#"{"sub":"x"}"#);
        assert!(decode_expiry(&token).is_none());
    }

    #[test]
    fn zero_exp_returns_none() {
        let token = make_token(r#"{"exp":0}"#);
        assert!(decode_expiry(&token).is_none());
    }

    #[test]
    fn malformed_token_returns_none() {
        assert!(decode_expiry("not-a-jwt").is_none());
    }
}
