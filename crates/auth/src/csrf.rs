//! Anti-forgery tokens for state-changing calls made with a user session.

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use tracing::debug;

use printforge_core::UserId;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CsrfError {
    #[error("csrf token missing")]
    Missing,

    #[error("csrf token malformed")]
    Malformed,

    #[error("csrf token expired")]
    Expired,

    #[error("csrf token invalid")]
    Invalid,
}

/// Validates anti-forgery tokens. Issuance is the session layer's concern.
pub trait CsrfValidator: Send + Sync {
    fn validate(&self, token: Option<&str>, user: UserId, now: DateTime<Utc>) -> Result<(), CsrfError>;
}

/// Stateless tokens of the form `{expires_unix}.{hex hmac}` bound to a user.
#[derive(Clone)]
pub struct HmacCsrfTokens {
    secret: Vec<u8>,
    ttl: Duration,
}

impl HmacCsrfTokens {
    pub fn new(secret: impl Into<Vec<u8>>, ttl: Duration) -> Self {
        Self {
            secret: secret.into(),
            ttl,
        }
    }

    pub fn issue(&self, user: UserId, now: DateTime<Utc>) -> String {
        let expires = (now + self.ttl).timestamp();
        let sig = self
            .mac(user, expires)
            .map(|m| hex::encode(m.finalize().into_bytes()))
            .unwrap_or_default();
        format!("{expires}.{sig}")
    }

    fn mac(&self, user: UserId, expires: i64) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).ok()?;
        mac.update(format!("csrf:{user}:{expires}").as_bytes());
        Some(mac)
    }
}

impl CsrfValidator for HmacCsrfTokens {
    fn validate(&self, token: Option<&str>, user: UserId, now: DateTime<Utc>) -> Result<(), CsrfError> {
        let token = token.filter(|t| !t.is_empty()).ok_or(CsrfError::Missing)?;

        let (expires, sig) = token.split_once('.').ok_or(CsrfError::Malformed)?;
        let expires: i64 = expires.parse().map_err(|_| CsrfError::Malformed)?;
        let sig = hex::decode(sig).map_err(|_| CsrfError::Malformed)?;

        let mac = self.mac(user, expires).ok_or(CsrfError::Invalid)?;
        mac.verify_slice(&sig).map_err(|_| CsrfError::Invalid)?;

        if now.timestamp() >= expires {
            debug!(user_id = %user, expired_at = expires, "csrf token expired");
            return Err(CsrfError::Expired);
        }
        Ok(())
    }
}

impl core::fmt::Debug for HmacCsrfTokens {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HmacCsrfTokens").field("ttl", &self.ttl).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens() -> HmacCsrfTokens {
        HmacCsrfTokens::new("csrf-secret", Duration::hours(1))
    }

    #[test]
    fn issued_token_validates_for_same_user() {
        let now = Utc::now();
        let user = UserId::new();
        let t = tokens().issue(user, now);
        assert_eq!(tokens().validate(Some(&t), user, now), Ok(()));
    }

    #[test]
    fn token_is_bound_to_user() {
        let now = Utc::now();
        let t = tokens().issue(UserId::new(), now);
        assert_eq!(
            tokens().validate(Some(&t), UserId::new(), now),
            Err(CsrfError::Invalid)
        );
    }

    #[test]
    fn expired_and_missing_tokens_fail() {
        let now = Utc::now();
        let user = UserId::new();
        let t = tokens().issue(user, now);
        assert_eq!(
            tokens().validate(Some(&t), user, now + Duration::hours(2)),
            Err(CsrfError::Expired)
        );
        assert_eq!(tokens().validate(None, user, now), Err(CsrfError::Missing));
        assert_eq!(
            tokens().validate(Some("garbage"), user, now),
            Err(CsrfError::Malformed)
        );
    }
}
