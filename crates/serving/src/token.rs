//! Signed tracking tokens.
//!
//! A token is `base64(payload_json || "|" || hex(hmac_sha256(payload_json)))`.
//! It carries no server-side state: validating one needs only the shared
//! secret, so serving and tracking nodes scale independently.

use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use motorads_core::config::TrackingConfig;
use motorads_core::types::Placement;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const SEPARATOR: char = '|';

/// Hex length of an HMAC-SHA256 tag.
const SIGNATURE_HEX_LEN: usize = 64;

/// Only the canonical lowercase encoding `issue` produces is accepted, so
/// every distinct token byte string maps to a distinct signature.
fn is_canonical_hex(signature: &str) -> bool {
    signature.len() == SIGNATURE_HEX_LEN
        && signature
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is not valid base64")]
    Encoding,
    #[error("token structure is malformed")]
    Malformed,
    #[error("token signature mismatch")]
    BadSignature,
    #[error("token expired ({age_secs}s since serve)")]
    Expired { age_secs: i64 },
    #[error("signing key rejected")]
    Key,
}

/// The serve decision a token vouches for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPayload {
    pub creative_id: Uuid,
    pub campaign_id: Uuid,
    pub placement: Placement,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    /// SHA-256 of the session id the ad was served to.
    pub session_hash: String,
    pub served_at: DateTime<Utc>,
}

pub struct TokenSigner {
    secret: Vec<u8>,
    ttl: Duration,
}

impl TokenSigner {
    pub fn new(config: &TrackingConfig) -> Self {
        Self::with_secret(config.secret.as_bytes(), config.token_ttl_secs)
    }

    pub fn with_secret(secret: &[u8], ttl_secs: i64) -> Self {
        Self {
            secret: secret.to_vec(),
            ttl: Duration::seconds(ttl_secs),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn mac(&self) -> Result<HmacSha256, TokenError> {
        HmacSha256::new_from_slice(&self.secret).map_err(|_| TokenError::Key)
    }

    pub fn issue(&self, payload: &TokenPayload) -> Result<String, TokenError> {
        let json = serde_json::to_string(payload).map_err(|_| TokenError::Malformed)?;
        let mut mac = self.mac()?;
        mac.update(json.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        let raw = format!("{json}{SEPARATOR}{signature}");
        Ok(base64::engine::general_purpose::STANDARD.encode(raw))
    }

    pub fn validate(&self, token: &str) -> Result<TokenPayload, TokenError> {
        self.validate_at(token, Utc::now())
    }

    /// Verify signature and age against `now`. A token is still valid at
    /// exactly `served_at + ttl` and expired one second later.
    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<TokenPayload, TokenError> {
        let raw = base64::engine::general_purpose::STANDARD
            .decode(token.trim())
            .map_err(|_| TokenError::Encoding)?;
        let raw = String::from_utf8(raw).map_err(|_| TokenError::Malformed)?;

        // The signature is hex, so the last separator is always ours even
        // when the payload itself contains one.
        let (json, signature) = raw.rsplit_once(SEPARATOR).ok_or(TokenError::Malformed)?;
        if !is_canonical_hex(signature) {
            return Err(TokenError::BadSignature);
        }
        let signature = hex::decode(signature).map_err(|_| TokenError::BadSignature)?;

        let mut mac = self.mac()?;
        mac.update(json.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let payload: TokenPayload =
            serde_json::from_str(json).map_err(|_| TokenError::Malformed)?;

        let age = now - payload.served_at;
        if age > self.ttl {
            return Err(TokenError::Expired {
                age_secs: age.num_seconds(),
            });
        }
        Ok(payload)
    }
}
