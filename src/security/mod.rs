//! Admission control for inbound events.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → credential.rs (shared bearer credential, always)
//!     → validator.rs  (parse envelope, look up project, pick mode)
//!         Backend  (payload carries `signature`):
//!             → signature.rs (timestamp window + HMAC-SHA256)
//!             → replay.rs    (insert-unique signature hash)
//!         Frontend (no signature):
//!             → domain.rs     (Origin vs allowed domain, if configured)
//!             → rate_limit.rs (fixed window per project key)
//!     → Accepted → event sink
//! ```
//!
//! # Design Decisions
//! - Authorization checks fail closed
//! - Replay and rate store outages follow a named, per-mechanism policy
//! - Rejection reasons never carry secrets or expected signatures
//! - signer.rs is the trusted-caller counterpart and shares canonicalization

pub mod credential;
pub mod domain;
pub mod rate_limit;
pub mod replay;
pub mod signature;
pub mod signer;
pub mod validator;

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::store::StoreError;

pub use credential::CredentialGate;
pub use domain::DomainGuard;
pub use rate_limit::RateLimiter;
pub use replay::ReplayGuard;
pub use signature::SignatureVerifier;
pub use signer::{ExecutionContext, SignedRequest, Signer, SignerError};
pub use validator::{Admission, GateError, InboundRequest, RequestValidator};

/// What a guard does when its backing store cannot answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Admit the request and record that protection was skipped.
    #[default]
    Open,
    /// Fail the request as an infrastructure error.
    Closed,
}

/// Admission policy, chosen per request by the payload's shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Signed by a trusted server caller.
    Backend,
    /// Unsigned browser caller, domain-restricted and rate-limited.
    Frontend,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Backend => "backend",
            Mode::Frontend => "frontend",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request rejection reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("signature missing")]
    MissingSignature,
    #[error("timestamp missing")]
    MissingTimestamp,
    #[error("timestamp expired")]
    ExpiredTimestamp,
    #[error("signature mismatch")]
    SignatureMismatch,
    #[error("replay detected")]
    ReplayDetected,
    #[error("domain not allowed")]
    DomainNotAllowed,
    #[error("origin required")]
    OriginRequired,
    #[error("rate limit exceeded")]
    RateLimitExceeded,
}

impl ValidationError {
    /// Stable machine-readable reason.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::MissingSignature => "missing_signature",
            ValidationError::MissingTimestamp => "missing_timestamp",
            ValidationError::ExpiredTimestamp => "expired_timestamp",
            ValidationError::SignatureMismatch => "signature_mismatch",
            ValidationError::ReplayDetected => "replay_detected",
            ValidationError::DomainNotAllowed => "domain_not_allowed",
            ValidationError::OriginRequired => "origin_required",
            ValidationError::RateLimitExceeded => "rate_limit_exceeded",
        }
    }
}

/// How a store-backed guard let a request through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admit {
    /// The store answered and the request passed.
    Checked,
    /// The store failed and the open policy admitted the request anyway.
    FailedOpen,
}

/// Failure of a store-backed guard.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error(transparent)]
    Rejected(#[from] ValidationError),
    #[error("{mechanism} store unavailable: {source}")]
    Infrastructure {
        mechanism: &'static str,
        #[source]
        source: StoreError,
    },
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Start of the fixed window containing `now_ms`.
pub fn window_start(now_ms: i64, window_ms: i64) -> i64 {
    now_ms.div_euclid(window_ms) * window_ms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_start_truncates() {
        assert_eq!(window_start(0, 60_000), 0);
        assert_eq!(window_start(59_999, 60_000), 0);
        assert_eq!(window_start(60_000, 60_000), 60_000);
        assert_eq!(window_start(1_700_000_012_345, 60_000), 1_699_999_980_000);
    }

    #[test]
    fn test_reason_codes_are_distinct() {
        let all = [
            ValidationError::MissingSignature,
            ValidationError::MissingTimestamp,
            ValidationError::ExpiredTimestamp,
            ValidationError::SignatureMismatch,
            ValidationError::ReplayDetected,
            ValidationError::DomainNotAllowed,
            ValidationError::OriginRequired,
            ValidationError::RateLimitExceeded,
        ];
        let codes: std::collections::HashSet<_> = all.iter().map(|e| e.code()).collect();
        assert_eq!(codes.len(), all.len());
    }

    #[test]
    fn test_failure_policy_default_is_open() {
        assert_eq!(FailurePolicy::default(), FailurePolicy::Open);
    }
}
