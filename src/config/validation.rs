//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (windows > 0, tolerance > 0)
//! - Check project seed integrity (unique ids and keys, secrets set)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GateConfig → Result<(), Vec<ConfigIssue>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;

use crate::config::schema::{GateConfig, StorageBackend, ADMIN_KEY_PLACEHOLDER};

/// A single semantic problem in a configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    pub field: String,
    pub message: String,
}

impl ConfigIssue {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &GateConfig) -> Result<(), Vec<ConfigIssue>> {
    let mut issues = Vec::new();

    if config.auth.credential.trim().is_empty() {
        issues.push(ConfigIssue::new("auth.credential", "must be set"));
    }

    if config.signature.timestamp_tolerance_ms <= 0 {
        issues.push(ConfigIssue::new(
            "signature.timestamp_tolerance_ms",
            "must be positive",
        ));
    }

    if config.rate_limit.max_per_window == 0 {
        issues.push(ConfigIssue::new("rate_limit.max_per_window", "must be positive"));
    }
    if config.rate_limit.window_ms <= 0 {
        issues.push(ConfigIssue::new("rate_limit.window_ms", "must be positive"));
    }
    if config.rate_limit.sweep_interval_secs == 0 {
        issues.push(ConfigIssue::new(
            "rate_limit.sweep_interval_secs",
            "must be positive",
        ));
    }

    if config.timeouts.request_secs == 0 {
        issues.push(ConfigIssue::new("timeouts.request_secs", "must be positive"));
    }

    if config.storage.backend == StorageBackend::Sqlite && config.storage.path.trim().is_empty() {
        issues.push(ConfigIssue::new(
            "storage.path",
            "required for the sqlite backend",
        ));
    }

    if config.admin.enabled {
        let key = config.admin.api_key.trim();
        if key.is_empty() || key == ADMIN_KEY_PLACEHOLDER {
            issues.push(ConfigIssue::new(
                "admin.api_key",
                "must be changed from the default when admin is enabled",
            ));
        }
    }

    let mut ids = HashSet::new();
    let mut public_keys = HashSet::new();
    for (i, project) in config.projects.iter().enumerate() {
        let field = |name: &str| format!("projects[{}].{}", i, name);

        if project.id.trim().is_empty() {
            issues.push(ConfigIssue::new(field("id"), "must be set"));
        } else if !ids.insert(project.id.as_str()) {
            issues.push(ConfigIssue::new(field("id"), "duplicate project id"));
        }

        if project.public_key.trim().is_empty() {
            issues.push(ConfigIssue::new(field("public_key"), "must be set"));
        } else if !public_keys.insert(project.public_key.as_str()) {
            issues.push(ConfigIssue::new(field("public_key"), "duplicate public key"));
        }

        if project.secret_key.is_empty() {
            issues.push(ConfigIssue::new(field("secret_key"), "must be set"));
        } else if project.secret_key == project.public_key {
            issues.push(ConfigIssue::new(
                field("secret_key"),
                "must differ from the public key",
            ));
        }

        if let Some(domain) = project.allowed_domain.as_deref() {
            if !is_bare_hostname(domain) {
                issues.push(ConfigIssue::new(
                    field("allowed_domain"),
                    "must be a bare hostname such as example.com",
                ));
            }
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}

/// Empty domains are allowed and mean "no restriction".
pub fn is_bare_hostname(domain: &str) -> bool {
    let domain = domain.trim();
    domain.is_empty()
        || !domain
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '/' | ':' | '@' | '*' | '?' | '#'))
}
