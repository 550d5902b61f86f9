//! Time-limited download links for finished prints.

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DownloadLinkError {
    #[error("download link expired")]
    Expired,

    #[error("download link signature invalid")]
    InvalidSignature,
}

/// Signs `download:{token}:{expires}` with HMAC-SHA256.
#[derive(Clone)]
pub struct UrlSigner {
    secret: Vec<u8>,
    ttl: Duration,
}

impl core::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UrlSigner").field("ttl", &self.ttl).finish()
    }
}

impl UrlSigner {
    pub fn new(secret: impl Into<Vec<u8>>, ttl: Duration) -> Self {
        Self {
            secret: secret.into(),
            ttl,
        }
    }

    /// `/downloads/{token}?expires={unix}&signature={hex}`
    pub fn download_url(&self, process_token: &str, now: DateTime<Utc>) -> String {
        let expires = (now + self.ttl).timestamp();
        let signature = self
            .mac(process_token, expires)
            .map(|m| hex::encode(m.finalize().into_bytes()))
            .unwrap_or_default();
        format!("/downloads/{process_token}?expires={expires}&signature={signature}")
    }

    pub fn verify_download(
        &self,
        process_token: &str,
        expires: i64,
        signature: &str,
        now: DateTime<Utc>,
    ) -> Result<(), DownloadLinkError> {
        let sig = hex::decode(signature).map_err(|_| DownloadLinkError::InvalidSignature)?;
        let mac = self
            .mac(process_token, expires)
            .ok_or(DownloadLinkError::InvalidSignature)?;
        mac.verify_slice(&sig)
            .map_err(|_| DownloadLinkError::InvalidSignature)?;
        if now.timestamp() >= expires {
            return Err(DownloadLinkError::Expired);
        }
        Ok(())
    }

    fn mac(&self, process_token: &str, expires: i64) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).ok()?;
        mac.update(format!("download:{process_token}:{expires}").as_bytes());
        Some(mac)
    }
}
