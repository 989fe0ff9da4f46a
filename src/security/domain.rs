//! Origin restriction for unsigned browser requests.

use url::Url;

use crate::security::ValidationError;

#[derive(Debug, Clone, Copy, Default)]
pub struct DomainGuard;

impl DomainGuard {
    /// Admit `origin` against `allowed_domain` (the domain or any subdomain).
    ///
    /// Only called when the project has a domain configured; a missing or
    /// unusable Origin header is then always rejected.
    pub fn validate(&self, origin: Option<&str>, allowed_domain: &str) -> Result<(), ValidationError> {
        let origin = origin
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .ok_or(ValidationError::OriginRequired)?;
        let host = origin_host(origin).ok_or(ValidationError::OriginRequired)?;

        if host_matches(&host, allowed_domain) {
            Ok(())
        } else {
            Err(ValidationError::DomainNotAllowed)
        }
    }
}

/// Hostname of an Origin header value such as `https://app.example.com:8443`.
fn origin_host(origin: &str) -> Option<String> {
    let url = Url::parse(origin).ok()?;
    url.host_str().map(|h| h.to_ascii_lowercase())
}

/// `host == domain` or `host` ends with `"." + domain`, ignoring case and a
/// trailing dot.
pub fn host_matches(host: &str, allowed_domain: &str) -> bool {
    let host = normalize(host);
    let domain = normalize(allowed_domain);
    if domain.is_empty() {
        return false;
    }
    host == domain
        || host
            .strip_suffix(domain.as_str())
            .is_some_and(|prefix| prefix.ends_with('.'))
}

fn normalize(name: &str) -> String {
    name.trim().trim_end_matches('.').to_ascii_lowercase()
}
