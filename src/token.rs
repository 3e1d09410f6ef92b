use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::Error;

/// Claims decoded from a token payload.
///
/// The signature is **not** verified: that is the issuer's job. Decoding only
/// checks structure, so a `DecodedClaims` is never partially filled. Either the
/// payload parses with an integer `exp`, or [`decode`] fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedClaims {
    #[serde(default)]
    pub sub: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    /// Expiry, seconds since the Unix epoch.
    pub exp: i64,
    /// Issuer-specific claims (`permissions`, `roles`, ...).
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl DecodedClaims {
    /// Expiry in milliseconds since the Unix epoch.
    #[must_use]
    pub fn expires_at_ms(&self) -> i64 {
        self.exp.saturating_mul(1000)
    }
}

/// Decodes a token's claims without verifying its signature.
///
/// # Errors
///
/// Returns `Error::Token` if the token is not three dot-separated segments,
/// the payload is not base64url JSON, or `exp` is missing or not an integer.
pub fn decode(token: &str) -> Result<DecodedClaims, Error> {
    let payload = decode_payload(token)?;
    serde_json::from_slice(&payload).map_err(|e| Error::Token(format!("invalid claims: {e}")))
}

/// `true` if the token cannot be decoded or `exp * 1000 <= now_ms`.
///
/// Decode failures count as expired.
#[must_use]
pub fn is_expired_at(token: &str, now_ms: i64) -> bool {
    match decode(token) {
        Ok(claims) => claims.expires_at_ms() <= now_ms,
        Err(_) => true,
    }
}

/// [`is_expired_at`] against the system clock.
#[must_use]
pub fn is_expired(token: &str) -> bool {
    use crate::clock::{Clock, SystemClock};
    is_expired_at(token, SystemClock.now_ms())
}

/// Looks up a single claim. Malformed tokens yield `None`.
#[must_use]
pub fn extract_field(token: &str, name: &str) -> Option<JsonValue> {
    let payload = decode_payload(token).ok()?;
    let mut claims: Map<String, JsonValue> = serde_json::from_slice(&payload).ok()?;
    claims.remove(name)
}

/// The `exp` claim, if the token carries an integer one.
#[must_use]
pub fn expires_at(token: &str) -> Option<i64> {
    extract_field(token, "exp").and_then(|v| v.as_i64())
}

/// Extracts and base64url-decodes the payload segment.
fn decode_payload(token: &str) -> Result<Vec<u8>, Error> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(Error::Token("invalid token format".into()));
    }

    let payload_b64 = parts[1].trim_end_matches('=');
    if payload_b64.is_empty() {
        return Err(Error::Token("empty payload".into()));
    }

    URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| Error::Token("invalid payload encoding".into()))
}

/// Unsigned token builder for tests.
#[cfg(test)]
pub(crate) mod testing {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use serde_json::{Value as JsonValue, json};

    pub(crate) fn encode(claims: &JsonValue) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{payload}.c2lnbmF0dXJl")
    }

    /// Token for `sub` expiring at `exp` (seconds).
    pub(crate) fn token_expiring(sub: &str, exp: i64) -> String {
        encode(&json!({ "sub": sub, "name": "Test User", "iat": exp - 3600, "exp": exp }))
    }
}
