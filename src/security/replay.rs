//! One-time admission of verified signatures.

use std::sync::Arc;

use crate::observability::metrics;
use crate::security::signature::signature_hash;
use crate::security::{Admit, FailurePolicy, GuardError, ValidationError};
use crate::store::{InsertOutcome, ReplayStore};

/// Remembers every admitted signature through the store's unique insert.
///
/// The store's constraint is the only synchronization: whichever instance
/// inserts first wins, every later insert of the same hash is a replay.
#[derive(Clone)]
pub struct ReplayGuard {
    store: Arc<dyn ReplayStore>,
    on_store_error: FailurePolicy,
}

impl ReplayGuard {
    pub fn new(store: Arc<dyn ReplayStore>, on_store_error: FailurePolicy) -> Self {
        Self {
            store,
            on_store_error,
        }
    }

    pub async fn admit_once(
        &self,
        project_id: &str,
        signature: &str,
        timestamp: i64,
    ) -> Result<Admit, GuardError> {
        let hash = signature_hash(signature);
        match self.store.insert_unique(project_id, &hash, timestamp).await {
            Ok(InsertOutcome::Inserted) => Ok(Admit::Checked),
            Ok(InsertOutcome::Duplicate) => Err(ValidationError::ReplayDetected.into()),
            Err(e) => match self.on_store_error {
                FailurePolicy::Open => {
                    tracing::warn!(
                        project_id = %project_id,
                        error = %e,
                        "Replay store unavailable, admitting without replay protection"
                    );
                    metrics::record_fail_open("replay");
                    Ok(Admit::FailedOpen)
                }
                FailurePolicy::Closed => Err(GuardError::Infrastructure {
                    mechanism: "replay",
                    source: e,
                }),
            },
        }
    }
}
