//! Fixed-window rate limiting per project.

use std::sync::Arc;

use crate::observability::metrics;
use crate::security::{window_start, Admit, FailurePolicy, GuardError, ValidationError};
use crate::store::RateWindowStore;

/// Caps admitted requests per project key per fixed window.
///
/// Counting is one atomic increment-or-create in the store, so concurrent
/// instances can never admit more than `max_per_window` in a window.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateWindowStore>,
    max_per_window: u32,
    window_ms: i64,
    on_store_error: FailurePolicy,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn RateWindowStore>,
        max_per_window: u32,
        window_ms: i64,
        on_store_error: FailurePolicy,
    ) -> Self {
        Self {
            store,
            max_per_window,
            window_ms,
            on_store_error,
        }
    }

    pub async fn try_admit(&self, project_key: &str, now_ms: i64) -> Result<Admit, GuardError> {
        let window = window_start(now_ms, self.window_ms);
        match self
            .store
            .try_increment(project_key, window, self.max_per_window)
            .await
        {
            Ok(Some(_)) => Ok(Admit::Checked),
            Ok(None) => {
                tracing::debug!(
                    project_key = %project_key,
                    window_start = window,
                    max = self.max_per_window,
                    "Rate limit exceeded"
                );
                Err(ValidationError::RateLimitExceeded.into())
            }
            Err(e) => match self.on_store_error {
                FailurePolicy::Open => {
                    tracing::warn!(
                        project_key = %project_key,
                        error = %e,
                        "Rate window store unavailable, admitting without rate limit"
                    );
                    metrics::record_fail_open("rate_limit");
                    Ok(Admit::FailedOpen)
                }
                FailurePolicy::Closed => Err(GuardError::Infrastructure {
                    mechanism: "rate_limit",
                    source: e,
                }),
            },
        }
    }
}
