//! Shared bearer credential check.

use subtle::ConstantTimeEq;

/// Outermost gate: every SDK request must carry the deployment credential.
#[derive(Clone)]
pub struct CredentialGate {
    credential: String,
}

impl CredentialGate {
    pub fn new(credential: impl Into<String>) -> Self {
        Self {
            credential: credential.into(),
        }
    }

    /// True only if the `Authorization` header is a Bearer token equal to the
    /// configured credential.
    pub fn check(&self, authorization: Option<&str>) -> bool {
        let Some(token) = authorization.and_then(bearer_token) else {
            return false;
        };
        if self.credential.is_empty() {
            return false;
        }
        token.as_bytes().ct_eq(self.credential.as_bytes()).into()
    }
}

/// Extract the token from `Bearer <token>`; the scheme is case-insensitive.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}
