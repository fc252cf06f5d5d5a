//! HMAC-SHA256 webhook signatures keyed by the Smartcar Application
//! Management Token.

use std::fmt;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Shared signing secret for one configured instance.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct WebhookSecret(String);

impl WebhookSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(self.0.as_bytes()).expect("HMAC accepts keys of any length")
    }
}

impl fmt::Debug for WebhookSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("WebhookSecret(<unset>)")
        } else {
            f.write_str("WebhookSecret(***)")
        }
    }
}

impl From<String> for WebhookSecret {
    fn from(secret: String) -> Self {
        Self(secret)
    }
}

/// Lowercase hex HMAC-SHA256 of `body`.
pub fn sign(secret: &WebhookSecret, body: &[u8]) -> String {
    let mut mac = secret.mac();
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Answer for a verification challenge: the hex HMAC of the challenge string.
pub fn hash_challenge(secret: &WebhookSecret, challenge: &str) -> String {
    sign(secret, challenge.as_bytes())
}

/// Check `provided_signature` against the HMAC of `raw_body`.
///
/// Never errors: a missing header, a missing or empty secret, a value that is
/// not hex, or a mismatch all yield `false`. The comparison is constant time.
pub fn verify(
    raw_body: &[u8],
    provided_signature: Option<&str>,
    secret: Option<&WebhookSecret>,
) -> bool {
    let Some(secret) = secret.filter(|secret| !secret.is_empty()) else {
        return false;
    };
    let Some(provided) = provided_signature
        .map(str::trim)
        .filter(|value| !value.is_empty())
    else {
        return false;
    };
    let provided = provided.strip_prefix("sha256=").unwrap_or(provided);
    let Ok(expected) = hex::decode(provided) else {
        return false;
    };

    let mut mac = secret.mac();
    mac.update(raw_body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_reference_vector() {
        let secret = WebhookSecret::new("key");
        assert_eq!(
            hash_challenge(&secret, "The quick brown fox jumps over the lazy dog"),
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn accepts_own_signature() {
        let secret = WebhookSecret::new("management-token");
        let body = br#"{"eventType":"VEHICLE_STATE","vehicleId":"v1"}"#;
        let signature = sign(&secret, body);

        assert!(verify(body, Some(&signature), Some(&secret)));
        assert!(verify(
            body,
            Some(&format!("sha256={}", signature.to_uppercase())),
            Some(&secret)
        ));
    }

    #[test]
    fn rejects_signature_from_other_secret() {
        let secret = WebhookSecret::new("management-token");
        let other = WebhookSecret::new("management-token-2");
        let body = b"{\"test\": \"data\"}";

        assert!(!verify(body, Some(&sign(&other, body)), Some(&secret)));
    }

    #[test]
    fn rejects_tampered_body() {
        let secret = WebhookSecret::new("management-token");
        let signature = sign(&secret, b"{\"odometer\": 1}");
        assert!(!verify(b"{\"odometer\": 2}", Some(&signature), Some(&secret)));
    }

    #[test]
    fn missing_inputs_are_rejected_without_error() {
        let secret = WebhookSecret::new("management-token");
        let body = b"{}";
        let signature = sign(&secret, body);

        assert!(!verify(body, None, Some(&secret)));
        assert!(!verify(body, Some(""), Some(&secret)));
        assert!(!verify(body, Some("not-hex"), Some(&secret)));
        assert!(!verify(body, Some(&signature), None));
        assert!(!verify(body, Some(&signature), Some(&WebhookSecret::default())));
    }

    #[test]
    fn challenge_answer_is_keyed_hmac() {
        let secret = WebhookSecret::new("topsecret");
        let answer = hash_challenge(&secret, "abc123");
        assert_eq!(answer.len(), 64);
        assert_eq!(answer, sign(&secret, b"abc123"));
        assert_ne!(answer, hash_challenge(&WebhookSecret::new("other"), "abc123"));
    }

    #[test]
    fn debug_output_hides_secret() {
        let rendered = format!("{:?}", WebhookSecret::new("hunter2"));
        assert!(!rendered.contains("hunter2"));
    }
}
