//! Shared-secret authentication for internal workers and the device feed.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Verifies the `X-API-Key` header against a configured secret.
///
/// Both sides are reduced to HMAC tags keyed by the secret and compared with
/// `verify_slice`, so the comparison time does not depend on where the
/// presented key first differs.
#[derive(Clone)]
pub struct ApiKeyVerifier {
    secret: Option<Vec<u8>>,
    expected_tag: Vec<u8>,
}

impl ApiKeyVerifier {
    /// `None` (or an empty secret) disables worker authentication entirely.
    pub fn new(secret: Option<String>) -> Self {
        let secret = secret.filter(|s| !s.is_empty()).map(String::into_bytes);
        let expected_tag = secret
            .as_deref()
            .and_then(|s| tag(s, s))
            .unwrap_or_default();
        Self {
            secret,
            expected_tag,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.secret.is_some()
    }

    pub fn verify(&self, presented: &str) -> bool {
        let Some(secret) = self.secret.as_deref() else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
            return false;
        };
        mac.update(presented.as_bytes());
        mac.verify_slice(&self.expected_tag).is_ok()
    }
}

impl core::fmt::Debug for ApiKeyVerifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ApiKeyVerifier")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

fn tag(key: &[u8], msg: &[u8]) -> Option<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key).ok()?;
    mac.update(msg);
    Some(mac.finalize().into_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_only_the_configured_key() {
        let v = ApiKeyVerifier::new(Some("worker-key".to_string()));
        assert!(v.verify("worker-key"));
        assert!(!v.verify("worker-kez"));
        assert!(!v.verify(""));
    }

    #[test]
    fn disabled_verifier_rejects_everything() {
        let v = ApiKeyVerifier::new(None);
        assert!(!v.is_enabled());
        assert!(!v.verify(""));

        let v = ApiKeyVerifier::new(Some(String::new()));
        assert!(!v.is_enabled());
    }
}
