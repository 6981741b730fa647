//! HMAC-SHA256 request authentication (§4.5, §6), grounded on the sibling
//! engine's `executor/api_client.rs::build_hmac_signature`: sign
//! `timestamp + method + path + body` with the URL-safe-base64-decoded API
//! secret, then re-encode the raw HMAC output as URL-safe base64.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::CoreError;

type HmacSha256 = Hmac<Sha256>;

/// The four headers the order API expects on every authenticated request
/// (§6 "Auth headers").
#[derive(Debug, Clone)]
pub struct AuthHeaders {
    pub address: String,
    pub api_key: String,
    pub passphrase: String,
    pub timestamp: String,
    pub signature: String,
}

/// Builds the `POLY_SIGNATURE` value: `HMAC_SHA256(base64_decode(secret), timestamp || method || path || body)`,
/// URL-safe base64 encoded.
pub fn build_hmac_signature(
    secret_b64: &str,
    timestamp: &str,
    method: &str,
    path: &str,
    body: &str,
) -> Result<String, CoreError> {
    let secret_bytes = URL_SAFE
        .decode(secret_b64)
        .map_err(|e| CoreError::Signing(format!("invalid API secret encoding: {e}")))?;

    let mut mac = HmacSha256::new_from_slice(&secret_bytes)
        .map_err(|e| CoreError::Signing(format!("HMAC key setup failed: {e}")))?;
    let message = format!("{timestamp}{method}{path}{body}");
    mac.update(message.as_bytes());
    let digest = mac.finalize().into_bytes();

    Ok(URL_SAFE.encode(digest))
}

/// Builds the full header set for one outbound request.
pub fn build_auth_headers(
    address: &str,
    api_key: &str,
    passphrase: &str,
    secret_b64: &str,
    method: &str,
    path: &str,
    body: &str,
    now_unix_secs: i64,
) -> Result<AuthHeaders, CoreError> {
    let timestamp = now_unix_secs.to_string();
    let signature = build_hmac_signature(secret_b64, &timestamp, method, path, body)?;
    Ok(AuthHeaders {
        address: address.to_string(),
        api_key: api_key.to_string(),
        passphrase: passphrase.to_string(),
        timestamp,
        signature,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic_for_identical_inputs() {
        let secret = URL_SAFE.encode(b"super-secret-key");
        let a = build_hmac_signature(&secret, "1700000000", "POST", "/orders", "{}").unwrap();
        let b = build_hmac_signature(&secret, "1700000000", "POST", "/orders", "{}").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn signature_changes_with_body() {
        let secret = URL_SAFE.encode(b"super-secret-key");
        let a = build_hmac_signature(&secret, "1700000000", "POST", "/orders", "{}").unwrap();
        let b = build_hmac_signature(&secret, "1700000000", "POST", "/orders", r#"{"x":1}"#).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn signature_is_url_safe_base64() {
        let secret = URL_SAFE.encode(b"super-secret-key");
        let sig = build_hmac_signature(&secret, "1700000000", "POST", "/orders", "[]").unwrap();
        assert!(!sig.contains('+'));
        assert!(!sig.contains('/'));
    }

    #[test]
    fn rejects_non_base64_secret() {
        let err = build_hmac_signature("not base64!!", "1700000000", "POST", "/orders", "{}").unwrap_err();
        assert!(matches!(err, CoreError::Signing(_)));
    }
}
