//! HMAC-SHA256 request signatures.
//!
//! Canonical message:
//! ```text
//! project_key ":" timestamp ":" nonce_or_empty ":" raw_body
//! ```
//! The raw body is used byte-for-byte. [`crate::security::signer`] builds the
//! same message through [`canonical_message`].

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::security::ValidationError;

type HmacSha256 = Hmac<Sha256>;

/// Default accepted clock distance, past or future.
pub const DEFAULT_TOLERANCE_MS: i64 = 5 * 60 * 1000;

pub fn canonical_message(project_key: &str, timestamp: i64, nonce: Option<&str>, raw_body: &str) -> Vec<u8> {
    let nonce = nonce.unwrap_or("");
    let mut message =
        Vec::with_capacity(project_key.len() + nonce.len() + raw_body.len() + 24);
    message.extend_from_slice(project_key.as_bytes());
    message.push(b':');
    message.extend_from_slice(timestamp.to_string().as_bytes());
    message.push(b':');
    message.extend_from_slice(nonce.as_bytes());
    message.push(b':');
    message.extend_from_slice(raw_body.as_bytes());
    message
}

fn mac_for(secret_key: &str, message: &[u8]) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
    mac.update(message);
    mac
}

/// Lowercase hex HMAC-SHA256 of the canonical message.
pub fn compute_signature(
    secret_key: &str,
    project_key: &str,
    timestamp: i64,
    nonce: Option<&str>,
    raw_body: &str,
) -> String {
    let message = canonical_message(project_key, timestamp, nonce, raw_body);
    hex::encode(mac_for(secret_key, &message).finalize().into_bytes())
}

/// Key under which a used signature is remembered by the replay store.
pub fn signature_hash(signature: &str) -> String {
    hex::encode(Sha256::digest(signature.to_ascii_lowercase().as_bytes()))
}

#[derive(Debug, Clone, Copy)]
pub struct SignatureVerifier {
    tolerance_ms: i64,
}

impl Default for SignatureVerifier {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE_MS)
    }
}

impl SignatureVerifier {
    pub fn new(tolerance_ms: i64) -> Self {
        Self { tolerance_ms }
    }

    /// Check presence, then freshness, then the MAC.
    ///
    /// Freshness comes before the MAC so stale requests never cost an HMAC.
    /// The MAC comparison is constant-time.
    #[allow(clippy::too_many_arguments)]
    pub fn verify(
        &self,
        project_key: &str,
        timestamp: Option<i64>,
        nonce: Option<&str>,
        raw_body: &str,
        provided_signature: Option<&str>,
        secret_key: &str,
        now_ms: i64,
    ) -> Result<(), ValidationError> {
        let provided = provided_signature
            .filter(|s| !s.is_empty())
            .ok_or(ValidationError::MissingSignature)?;
        let timestamp = timestamp.ok_or(ValidationError::MissingTimestamp)?;

        if now_ms.abs_diff(timestamp) > self.tolerance_ms.unsigned_abs() {
            return Err(ValidationError::ExpiredTimestamp);
        }

        let provided =
            hex::decode(provided.to_ascii_lowercase()).map_err(|_| ValidationError::SignatureMismatch)?;
        let message = canonical_message(project_key, timestamp, nonce, raw_body);
        mac_for(secret_key, &message)
            .verify_slice(&provided)
            .map_err(|_| ValidationError::SignatureMismatch)
    }
}
