//! Durable state behind the admission gate.
//!
//! # Data Flow
//! ```text
//! RequestValidator
//!     → ProjectStore     (lookup by public key)
//!     → ReplayStore      (insert-unique per project + signature hash)
//!     → RateWindowStore  (atomic conditional increment per window)
//!
//! janitor.rs
//!     → RateWindowStore::purge_windows_before (periodic)
//! ```
//!
//! # Design Decisions
//! - The validator holds no admission state; every instance shares the store
//! - Exactly-once replay admission is delegated to the store's unique insert
//! - Rate counting is a single increment-or-create, never read-then-write

pub mod janitor;
pub mod memory;
pub mod sqlite;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{ProjectConfig, StorageBackend, StorageConfig};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Errors raised by a backing store. Logical outcomes such as "duplicate" or
/// "window full" are not errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Identity record for a tracked project.
#[derive(Clone, PartialEq, Eq)]
pub struct Project {
    pub id: String,
    /// Safe to expose; used by SDKs to address the project.
    pub public_key: String,
    /// Server-side only.
    pub secret_key: String,
    pub allowed_domain: Option<String>,
    pub signed_only: bool,
}

impl Project {
    /// The allowed domain, if one is configured and non-empty.
    pub fn domain_restriction(&self) -> Option<&str> {
        self.allowed_domain
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
    }
}

impl fmt::Debug for Project {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Project")
            .field("id", &self.id)
            .field("public_key", &self.public_key)
            .field("secret_key", &"<redacted>")
            .field("allowed_domain", &self.allowed_domain)
            .field("signed_only", &self.signed_only)
            .finish()
    }
}

impl From<&ProjectConfig> for Project {
    fn from(config: &ProjectConfig) -> Self {
        Self {
            id: config.id.clone(),
            public_key: config.public_key.clone(),
            secret_key: config.secret_key.clone(),
            allowed_domain: config.allowed_domain.clone(),
            signed_only: config.signed_only,
        }
    }
}

/// Result of an insert against a uniqueness constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn lookup_by_public_key(&self, public_key: &str) -> Result<Option<Project>, StoreError>;

    /// Create the project, or refresh its mutable fields if the id exists.
    /// Keys of an existing project are never changed.
    async fn upsert_project(&self, project: Project) -> Result<(), StoreError>;

    /// Returns false when no project has this public key.
    async fn set_allowed_domain(
        &self,
        public_key: &str,
        allowed_domain: Option<String>,
    ) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait RateWindowStore: Send + Sync {
    /// Atomically create the window with count 1, or increment it while it is
    /// below `max`. Returns the new count, or `None` when the window is full.
    async fn try_increment(
        &self,
        project_key: &str,
        window_start: i64,
        max: u32,
    ) -> Result<Option<u32>, StoreError>;

    /// Delete windows that started before `window_start`. Returns rows removed.
    async fn purge_windows_before(&self, window_start: i64) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait ReplayStore: Send + Sync {
    async fn insert_unique(
        &self,
        project_id: &str,
        signature_hash: &str,
        timestamp: i64,
    ) -> Result<InsertOutcome, StoreError>;
}

/// The three store roles, possibly served by one backend.
#[derive(Clone)]
pub struct Stores {
    pub projects: Arc<dyn ProjectStore>,
    pub rate_windows: Arc<dyn RateWindowStore>,
    pub replays: Arc<dyn ReplayStore>,
}

impl Stores {
    /// Use one backend for every role.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: ProjectStore + RateWindowStore + ReplayStore + 'static,
    {
        Self {
            projects: store.clone(),
            rate_windows: store.clone(),
            replays: store,
        }
    }

    /// Open the backend named in the storage config.
    pub fn open(config: &StorageConfig) -> Result<Self, StoreError> {
        match config.backend {
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory store; replay and rate state is per-instance");
                Ok(Self::shared(Arc::new(MemoryStore::new())))
            }
            StorageBackend::Sqlite => {
                let store = SqliteStore::open(config)?;
                tracing::info!(path = %config.path, "Opened sqlite store");
                Ok(Self::shared(Arc::new(store)))
            }
        }
    }

    /// Upsert every configured project.
    pub async fn seed_projects(&self, projects: &[ProjectConfig]) -> Result<(), StoreError> {
        for config in projects {
            self.projects.upsert_project(Project::from(config)).await?;
        }
        tracing::info!(count = projects.len(), "Seeded projects");
        Ok(())
    }
}
