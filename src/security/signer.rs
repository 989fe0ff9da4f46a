//! Request signing for trusted server callers.
//!
//! A [`Signer`] holds a project's secret key, so it refuses to exist in an
//! execution context whose memory or code is visible to an untrusted party.

use rand::RngCore;
use serde_json::{Map, Value};

use crate::security::now_millis;
use crate::security::signature::compute_signature;

/// Envelope fields added by signing; excluded from the signed body.
pub const ENVELOPE_FIELDS: [&str; 3] = ["signature", "timestamp", "nonce"];

#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("refusing to hold a secret key in an untrusted execution context ({0:?})")]
    UntrustedContext(ExecutionContext),
    #[error("secret key must not be empty")]
    EmptySecret,
    #[error("payload must be a JSON object")]
    NotAnObject,
    #[error("payload is missing a string projectKey")]
    MissingProjectKey,
    #[error("payload could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Where the current code is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionContext {
    /// A server process the operator controls.
    Server,
    /// A browser or other document-capable runtime shipped to end users.
    Browser,
}

impl ExecutionContext {
    /// Detect the context this binary was compiled for.
    pub fn current() -> Self {
        if cfg!(all(target_arch = "wasm32", target_os = "unknown")) {
            ExecutionContext::Browser
        } else {
            ExecutionContext::Server
        }
    }

    pub fn may_hold_secrets(&self) -> bool {
        matches!(self, ExecutionContext::Server)
    }
}

/// A signed request, ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedRequest {
    pub project_key: String,
    pub timestamp: i64,
    pub nonce: Option<String>,
    pub signature: String,
    /// Exact string the signature covers.
    pub raw_body: String,
    payload: Map<String, Value>,
}

impl SignedRequest {
    /// The original payload plus `timestamp`, `nonce` and `signature`.
    pub fn into_payload(self) -> Value {
        let mut payload = self.payload;
        payload.insert("timestamp".into(), Value::from(self.timestamp));
        if let Some(nonce) = self.nonce {
            payload.insert("nonce".into(), Value::from(nonce));
        }
        payload.insert("signature".into(), Value::from(self.signature));
        Value::Object(payload)
    }
}

pub struct Signer {
    secret_key: String,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").finish_non_exhaustive()
    }
}

impl Signer {
    /// Create a signer for the detected execution context.
    pub fn new(secret_key: impl Into<String>) -> Result<Self, SignerError> {
        Self::for_context(secret_key, ExecutionContext::current())
    }

    pub fn for_context(
        secret_key: impl Into<String>,
        context: ExecutionContext,
    ) -> Result<Self, SignerError> {
        if !context.may_hold_secrets() {
            return Err(SignerError::UntrustedContext(context));
        }
        let secret_key = secret_key.into();
        if secret_key.is_empty() {
            return Err(SignerError::EmptySecret);
        }
        Ok(Self { secret_key })
    }

    /// Sign `payload` now with a fresh random nonce.
    pub fn sign(&self, payload: &Value) -> Result<SignedRequest, SignerError> {
        self.sign_at(payload, now_millis(), Some(random_nonce()))
    }

    /// Sign with an explicit timestamp and nonce.
    pub fn sign_at(
        &self,
        payload: &Value,
        timestamp: i64,
        nonce: Option<String>,
    ) -> Result<SignedRequest, SignerError> {
        let mut payload = payload.as_object().cloned().ok_or(SignerError::NotAnObject)?;
        for field in ENVELOPE_FIELDS {
            payload.remove(field);
        }
        let project_key = payload
            .get("projectKey")
            .and_then(Value::as_str)
            .ok_or(SignerError::MissingProjectKey)?
            .to_string();

        let raw_body = wire_body(&payload)?;
        let signature = compute_signature(
            &self.secret_key,
            &project_key,
            timestamp,
            nonce.as_deref(),
            &raw_body,
        );

        Ok(SignedRequest {
            project_key,
            timestamp,
            nonce,
            signature,
            raw_body,
            payload,
        })
    }
}

/// Compact JSON of the payload with envelope fields removed, key order kept.
/// Both signer and validator derive the signed body through this function.
pub fn wire_body(payload: &Map<String, Value>) -> Result<String, serde_json::Error> {
    serde_json::to_string(payload)
}

/// 16 random bytes, hex-encoded.
pub fn random_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
