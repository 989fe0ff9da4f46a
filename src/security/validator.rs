//! Two-mode admission protocol.
//!
//! ```text
//! Received
//!   → CredentialChecked
//!   → ModeDetermined
//!       Backend:  SignatureChecked → ReplayChecked → Accepted
//!       Frontend: DomainChecked    → RateChecked   → Accepted
//!   any failed check → Rejected(reason, mode)
//! ```

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::config::GateConfig;
use crate::security::signer::{wire_body, ENVELOPE_FIELDS};
use crate::security::{
    Admit, CredentialGate, DomainGuard, GuardError, Mode, RateLimiter, ReplayGuard,
    SignatureVerifier, ValidationError,
};
use crate::store::{Project, ProjectStore, StoreError, Stores};

/// Everything the validator reads from one HTTP request.
#[derive(Debug, Clone, Copy)]
pub struct InboundRequest<'a> {
    pub authorization: Option<&'a str>,
    pub origin: Option<&'a str>,
    pub body: &'a [u8],
}

/// An admitted request, ready for the event sink.
#[derive(Debug, Clone)]
pub struct Admission {
    pub project: Project,
    pub mode: Mode,
    /// The event payload. Signed requests lose `signature`, `timestamp` and
    /// `nonce`; unsigned ones only an empty `signature`.
    pub payload: Value,
    /// True when a store-backed guard was skipped under the open policy.
    pub degraded: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("invalid credential")]
    InvalidCredential,
    #[error("malformed body: {0}")]
    MalformedBody(String),
    #[error("unknown project key")]
    UnknownProject,
    #[error("{reason}")]
    Rejected { reason: ValidationError, mode: Mode },
    #[error("project store unavailable: {0}")]
    ProjectStore(#[source] StoreError),
    #[error("{mechanism} store unavailable: {source}")]
    Infrastructure {
        mechanism: &'static str,
        #[source]
        source: StoreError,
    },
}

impl GateError {
    /// Stable machine-readable reason.
    pub fn code(&self) -> &'static str {
        match self {
            GateError::InvalidCredential => "invalid_credential",
            GateError::MalformedBody(_) => "malformed_body",
            GateError::UnknownProject => "unknown_project",
            GateError::Rejected { reason, .. } => reason.code(),
            GateError::ProjectStore(_) | GateError::Infrastructure { .. } => "store_unavailable",
        }
    }

    /// Message safe to return to the caller.
    pub fn public_message(&self) -> String {
        match self {
            GateError::ProjectStore(_) | GateError::Infrastructure { .. } => {
                "service temporarily unavailable".to_string()
            }
            other => other.to_string(),
        }
    }

    pub fn mode(&self) -> Option<Mode> {
        match self {
            GateError::Rejected { mode, .. } => Some(*mode),
            _ => None,
        }
    }

    fn from_guard(err: GuardError, mode: Mode) -> Self {
        match err {
            GuardError::Rejected(reason) => GateError::Rejected { reason, mode },
            GuardError::Infrastructure { mechanism, source } => {
                GateError::Infrastructure { mechanism, source }
            }
        }
    }
}

/// Parsed request body.
#[derive(Debug)]
struct Envelope {
    project_key: String,
    signature: Option<String>,
    timestamp: Option<i64>,
    nonce: Option<String>,
    payload: Map<String, Value>,
}

impl Envelope {
    fn parse(body: &[u8]) -> Result<Self, GateError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| GateError::MalformedBody(format!("invalid JSON: {}", e)))?;
        let Value::Object(mut payload) = value else {
            return Err(GateError::MalformedBody("body must be a JSON object".into()));
        };

        let project_key = match payload.get("projectKey") {
            Some(Value::String(key)) if !key.trim().is_empty() => key.clone(),
            _ => return Err(GateError::MalformedBody("projectKey is required".into())),
        };

        let signature = optional_string(&payload, "signature")?.filter(|s| !s.is_empty());
        let Some(signature) = signature else {
            // Unsigned: everything but the empty signature field is event data.
            payload.remove("signature");
            return Ok(Self {
                project_key,
                signature: None,
                timestamp: None,
                nonce: None,
                payload,
            });
        };

        let nonce = optional_string(&payload, "nonce")?;
        let timestamp = match payload.get("timestamp") {
            None | Some(Value::Null) => None,
            Some(v) => Some(v.as_i64().ok_or_else(|| {
                GateError::MalformedBody("timestamp must be an integer".into())
            })?),
        };

        for field in ENVELOPE_FIELDS {
            payload.remove(field);
        }

        Ok(Self {
            project_key,
            signature: Some(signature),
            timestamp,
            nonce,
            payload,
        })
    }

    fn mode(&self) -> Mode {
        if self.signature.is_some() {
            Mode::Backend
        } else {
            Mode::Frontend
        }
    }
}

fn optional_string(payload: &Map<String, Value>, field: &str) -> Result<Option<String>, GateError> {
    match payload.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(GateError::MalformedBody(format!("{} must be a string", field))),
    }
}

/// Orchestrates the guards. Holds no per-request state; safe to share.
#[derive(Clone)]
pub struct RequestValidator {
    credential: CredentialGate,
    projects: Arc<dyn ProjectStore>,
    verifier: SignatureVerifier,
    replay: ReplayGuard,
    domain: DomainGuard,
    rate: RateLimiter,
}

impl RequestValidator {
    pub fn new(
        credential: CredentialGate,
        projects: Arc<dyn ProjectStore>,
        verifier: SignatureVerifier,
        replay: ReplayGuard,
        rate: RateLimiter,
    ) -> Self {
        Self {
            credential,
            projects,
            verifier,
            replay,
            domain: DomainGuard,
            rate,
        }
    }

    pub fn from_config(config: &GateConfig, stores: &Stores) -> Self {
        Self::new(
            CredentialGate::new(config.auth.credential.clone()),
            stores.projects.clone(),
            SignatureVerifier::new(config.signature.timestamp_tolerance_ms),
            ReplayGuard::new(stores.replays.clone(), config.replay.on_store_error),
            RateLimiter::new(
                stores.rate_windows.clone(),
                config.rate_limit.max_per_window,
                config.rate_limit.window_ms,
                config.rate_limit.on_store_error,
            ),
        )
    }

    pub async fn validate(
        &self,
        request: InboundRequest<'_>,
        now_ms: i64,
    ) -> Result<Admission, GateError> {
        if !self.credential.check(request.authorization) {
            return Err(GateError::InvalidCredential);
        }

        let envelope = Envelope::parse(request.body)?;
        let project = self
            .projects
            .lookup_by_public_key(&envelope.project_key)
            .await
            .map_err(GateError::ProjectStore)?
            .ok_or(GateError::UnknownProject)?;

        let mode = envelope.mode();
        let admit = match mode {
            Mode::Backend => self.admit_backend(&project, &envelope, now_ms).await,
            Mode::Frontend => self.admit_frontend(&project, request.origin, now_ms).await,
        }
        .map_err(|e| GateError::from_guard(e, mode))?;

        Ok(Admission {
            project,
            mode,
            payload: Value::Object(envelope.payload),
            degraded: admit == Admit::FailedOpen,
        })
    }

    async fn admit_backend(
        &self,
        project: &Project,
        envelope: &Envelope,
        now_ms: i64,
    ) -> Result<Admit, GuardError> {
        let raw_body = wire_body(&envelope.payload)
            .map_err(|_| GuardError::Rejected(ValidationError::SignatureMismatch))?;
        self.verifier.verify(
            &envelope.project_key,
            envelope.timestamp,
            envelope.nonce.as_deref(),
            &raw_body,
            envelope.signature.as_deref(),
            &project.secret_key,
            now_ms,
        )?;

        // Presence was checked by the verifier.
        let signature = envelope.signature.as_deref().unwrap_or_default();
        let timestamp = envelope.timestamp.unwrap_or(now_ms);
        self.replay.admit_once(&project.id, signature, timestamp).await
    }

    async fn admit_frontend(
        &self,
        project: &Project,
        origin: Option<&str>,
        now_ms: i64,
    ) -> Result<Admit, GuardError> {
        if project.signed_only {
            return Err(ValidationError::MissingSignature.into());
        }
        if let Some(domain) = project.domain_restriction() {
            self.domain.validate(origin, domain)?;
        }
        self.rate.try_admit(&project.public_key, now_ms).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::{FailurePolicy, Signer};
    use crate::store::MemoryStore;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000_000;
    const AUTH: Option<&str> = Some("Bearer shared");

    async fn validator_with(max_per_window: u32) -> RequestValidator {
        let store = Arc::new(MemoryStore::new());
        let stores = Stores::shared(store);
        stores
            .projects
            .upsert_project(Project {
                id: "p1".into(),
                public_key: "pk_abc".into(),
                secret_key: "sk_xyz".into(),
                allowed_domain: Some("example.com".into()),
                signed_only: false,
            })
            .await
            .unwrap();
        stores
            .projects
            .upsert_project(Project {
                id: "p2".into(),
                public_key: "pk_open".into(),
                secret_key: "sk_open".into(),
                allowed_domain: None,
                signed_only: false,
            })
            .await
            .unwrap();

        let mut config = GateConfig::default();
        config.auth.credential = "shared".into();
        config.rate_limit.max_per_window = max_per_window;
        RequestValidator::from_config(&config, &stores)
    }

    fn signed_body(payload: Value, secret: &str, timestamp: i64) -> Vec<u8> {
        let signer = Signer::new(secret).unwrap();
        let signed = signer.sign_at(&payload, timestamp, Some("n1".into())).unwrap();
        serde_json::to_vec(&signed.into_payload()).unwrap()
    }

    fn request<'a>(body: &'a [u8], origin: Option<&'a str>) -> InboundRequest<'a> {
        InboundRequest {
            authorization: AUTH,
            origin,
            body,
        }
    }

    #[tokio::test]
    async fn test_credential_checked_first() {
        let validator = validator_with(10).await;
        let err = validator
            .validate(
                InboundRequest {
                    authorization: Some("Bearer wrong"),
                    origin: None,
                    body: b"not json",
                },
                NOW,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::InvalidCredential));
        assert_eq!(err.code(), "invalid_credential");
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_project() {
        let validator = validator_with(10).await;

        let err = validator.validate(request(b"[1]", None), NOW).await.unwrap_err();
        assert!(matches!(err, GateError::MalformedBody(_)));

        let err = validator
            .validate(request(br#"{"event":"x"}"#, None), NOW)
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::MalformedBody(_)));

        let err = validator
            .validate(
                request(br#"{"projectKey":"pk_abc","signature":"ab","timestamp":"soon"}"#, None),
                NOW,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::MalformedBody(_)));

        let err = validator
            .validate(request(br#"{"projectKey":"pk_nope"}"#, None), NOW)
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::UnknownProject));
    }

    #[tokio::test]
    async fn test_backend_accepted_once_then_replay() {
        let validator = validator_with(10).await;
        let body = signed_body(json!({"projectKey": "pk_abc", "event": "JOURNEY_START"}), "sk_xyz", NOW);

        let admission = validator.validate(request(&body, None), NOW).await.unwrap();
        assert_eq!(admission.mode, Mode::Backend);
        assert_eq!(admission.project.id, "p1");
        assert!(!admission.degraded);
        assert_eq!(admission.payload, json!({"projectKey": "pk_abc", "event": "JOURNEY_START"}));

        let err = validator.validate(request(&body, None), NOW + 1).await.unwrap_err();
        assert!(matches!(
            err,
            GateError::Rejected {
                reason: ValidationError::ReplayDetected,
                mode: Mode::Backend
            }
        ));
    }

    #[tokio::test]
    async fn test_backend_mode_skips_domain_and_rate_checks() {
        let validator = validator_with(1).await;
        for i in 0..3 {
            let body = signed_body(json!({"projectKey": "pk_abc", "seq": i}), "sk_xyz", NOW);
            assert!(validator.validate(request(&body, None), NOW).await.is_ok());
        }
    }

    #[tokio::test]
    async fn test_backend_rejections() {
        let validator = validator_with(10).await;

        let forged = signed_body(json!({"projectKey": "pk_abc", "event": "x"}), "sk_guess", NOW);
        let err = validator.validate(request(&forged, None), NOW).await.unwrap_err();
        assert_eq!(err.code(), "signature_mismatch");
        assert_eq!(err.mode(), Some(Mode::Backend));

        let stale = signed_body(json!({"projectKey": "pk_abc", "event": "x"}), "sk_xyz", NOW - 300_001);
        let err = validator.validate(request(&stale, None), NOW).await.unwrap_err();
        assert_eq!(err.code(), "expired_timestamp");

        let err = validator
            .validate(request(br#"{"projectKey":"pk_abc","signature":"abcd"}"#, None), NOW)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "missing_timestamp");
    }

    #[tokio::test]
    async fn test_tampered_body_is_mismatch() {
        let validator = validator_with(10).await;
        let body = signed_body(json!({"projectKey": "pk_abc", "event": "x"}), "sk_xyz", NOW);
        let mut wire: Value = serde_json::from_slice(&body).unwrap();
        wire["event"] = json!("y");
        let tampered = serde_json::to_vec(&wire).unwrap();

        let err = validator.validate(request(&tampered, None), NOW).await.unwrap_err();
        assert_eq!(err.code(), "signature_mismatch");
    }

    #[tokio::test]
    async fn test_replay_with_changed_body_still_rejected() {
        let validator = validator_with(10).await;
        let body = signed_body(json!({"projectKey": "pk_abc", "event": "x"}), "sk_xyz", NOW);
        assert!(validator.validate(request(&body, None), NOW).await.is_ok());

        // Same signature, different payload: mismatch, never a second admission.
        let mut wire: Value = serde_json::from_slice(&body).unwrap();
        wire["event"] = json!("y");
        let changed = serde_json::to_vec(&wire).unwrap();
        assert!(validator.validate(request(&changed, None), NOW).await.is_err());
    }

    #[tokio::test]
    async fn test_frontend_domain_rules() {
        let validator = validator_with(10).await;
        let body = br#"{"projectKey":"pk_abc","event":"x"}"#;

        let admission = validator
            .validate(request(body, Some("https://app.example.com")), NOW)
            .await
            .unwrap();
        assert_eq!(admission.mode, Mode::Frontend);

        let err = validator
            .validate(request(body, Some("https://notexample.com")), NOW)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "domain_not_allowed");

        let err = validator.validate(request(body, None), NOW).await.unwrap_err();
        assert_eq!(err.code(), "origin_required");
    }

    #[tokio::test]
    async fn test_frontend_without_domain_needs_no_origin() {
        let validator = validator_with(2).await;
        let body = br#"{"projectKey":"pk_open","event":"x"}"#;
        assert!(validator.validate(request(body, None), NOW).await.is_ok());
        assert!(validator.validate(request(body, None), NOW).await.is_ok());

        let err = validator.validate(request(body, None), NOW).await.unwrap_err();
        assert_eq!(err.code(), "rate_limit_exceeded");
        assert_eq!(err.mode(), Some(Mode::Frontend));
    }

    #[tokio::test]
    async fn test_whitespace_signature_is_backend() {
        let validator = validator_with(10).await;
        let body = br#"{"projectKey":"pk_open","signature":" ","event":"x"}"#;
        let err = validator.validate(request(body, None), NOW).await.unwrap_err();
        assert_eq!(err.mode(), Some(Mode::Backend));
        assert_eq!(err.code(), "missing_timestamp");
    }

    #[tokio::test]
    async fn test_frontend_keeps_event_timestamp_and_nonce() {
        let validator = validator_with(10).await;

        let body = br#"{"projectKey":"pk_open","timestamp":"2024-01-01T00:00:00Z","nonce":7}"#;
        let admission = validator.validate(request(body, None), NOW).await.unwrap();
        assert_eq!(admission.mode, Mode::Frontend);
        assert_eq!(admission.payload["timestamp"], "2024-01-01T00:00:00Z");
        assert_eq!(admission.payload["nonce"], 7);

        let body = br#"{"projectKey":"pk_open","timestamp":1700000000000,"signature":null}"#;
        let admission = validator.validate(request(body, None), NOW).await.unwrap();
        assert_eq!(admission.payload, json!({"projectKey": "pk_open", "timestamp": 1_700_000_000_000i64}));
    }

    #[tokio::test]
    async fn test_empty_signature_is_frontend() {
        let validator = validator_with(10).await;
        let body = br#"{"projectKey":"pk_open","signature":"","event":"x"}"#;
        let admission = validator.validate(request(body, None), NOW).await.unwrap();
        assert_eq!(admission.mode, Mode::Frontend);
    }

    #[tokio::test]
    async fn test_signed_only_project_rejects_unsigned() {
        let store = Arc::new(MemoryStore::new());
        let stores = Stores::shared(store);
        stores
            .projects
            .upsert_project(Project {
                id: "p3".into(),
                public_key: "pk_server".into(),
                secret_key: "sk_server".into(),
                allowed_domain: None,
                signed_only: true,
            })
            .await
            .unwrap();
        let mut config = GateConfig::default();
        config.auth.credential = "shared".into();
        config.replay.on_store_error = FailurePolicy::Closed;
        let validator = RequestValidator::from_config(&config, &stores);

        let err = validator
            .validate(request(br#"{"projectKey":"pk_server"}"#, None), NOW)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "missing_signature");

        let body = signed_body(json!({"projectKey": "pk_server"}), "sk_server", NOW);
        assert!(validator.validate(request(&body, None), NOW).await.is_ok());
    }
}
