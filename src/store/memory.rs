//! In-process store backed by concurrent maps.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::store::{InsertOutcome, Project, ProjectStore, RateWindowStore, ReplayStore, StoreError};

/// A thread-safe store for single-instance deployments and tests.
///
/// Every mutation goes through the DashMap entry API, which holds the shard
/// lock for the key, so insert-unique and conditional increment are atomic.
#[derive(Default)]
pub struct MemoryStore {
    /// public key -> project
    projects: DashMap<String, Project>,
    /// (project key, window start) -> count
    windows: DashMap<(String, i64), u32>,
    /// (project id, signature hash) -> signed timestamp
    replays: DashMap<(String, String), i64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current count for a window, if it exists.
    pub fn window_count(&self, project_key: &str, window_start: i64) -> Option<u32> {
        self.windows
            .get(&(project_key.to_string(), window_start))
            .map(|r| *r.value())
    }

    pub fn replay_record_count(&self) -> usize {
        self.replays.len()
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn lookup_by_public_key(&self, public_key: &str) -> Result<Option<Project>, StoreError> {
        Ok(self.projects.get(public_key).map(|r| r.value().clone()))
    }

    async fn upsert_project(&self, project: Project) -> Result<(), StoreError> {
        let existing = self
            .projects
            .iter()
            .find(|r| r.value().id == project.id)
            .map(|r| r.key().clone());

        match existing {
            Some(public_key) => {
                if let Some(mut stored) = self.projects.get_mut(&public_key) {
                    stored.allowed_domain = project.allowed_domain;
                    stored.signed_only = project.signed_only;
                }
            }
            None => {
                if self.projects.contains_key(&project.public_key) {
                    return Err(StoreError::Backend(format!(
                        "public key already belongs to another project: {}",
                        project.public_key
                    )));
                }
                self.projects.insert(project.public_key.clone(), project);
            }
        }
        Ok(())
    }

    async fn set_allowed_domain(
        &self,
        public_key: &str,
        allowed_domain: Option<String>,
    ) -> Result<bool, StoreError> {
        match self.projects.get_mut(public_key) {
            Some(mut project) => {
                project.allowed_domain = allowed_domain;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl RateWindowStore for MemoryStore {
    async fn try_increment(
        &self,
        project_key: &str,
        window_start: i64,
        max: u32,
    ) -> Result<Option<u32>, StoreError> {
        let mut count = self
            .windows
            .entry((project_key.to_string(), window_start))
            .or_insert(0);
        if *count < max {
            *count += 1;
            Ok(Some(*count))
        } else {
            Ok(None)
        }
    }

    async fn purge_windows_before(&self, window_start: i64) -> Result<u64, StoreError> {
        let before = self.windows.len();
        self.windows.retain(|(_, start), _| *start >= window_start);
        Ok(before.saturating_sub(self.windows.len()) as u64)
    }
}

#[async_trait]
impl ReplayStore for MemoryStore {
    async fn insert_unique(
        &self,
        project_id: &str,
        signature_hash: &str,
        timestamp: i64,
    ) -> Result<InsertOutcome, StoreError> {
        match self
            .replays
            .entry((project_id.to_string(), signature_hash.to_string()))
        {
            Entry::Occupied(_) => Ok(InsertOutcome::Duplicate),
            Entry::Vacant(slot) => {
                slot.insert(timestamp);
                Ok(InsertOutcome::Inserted)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn project(id: &str, pk: &str) -> Project {
        Project {
            id: id.into(),
            public_key: pk.into(),
            secret_key: format!("sk_{}", id),
            allowed_domain: None,
            signed_only: false,
        }
    }

    #[tokio::test]
    async fn test_upsert_keeps_keys_and_updates_domain() {
        let store = MemoryStore::new();
        store.upsert_project(project("p1", "pk_1")).await.unwrap();

        let mut changed = project("p1", "pk_other");
        changed.secret_key = "sk_rotated".into();
        changed.allowed_domain = Some("example.com".into());
        store.upsert_project(changed).await.unwrap();

        let stored = store.lookup_by_public_key("pk_1").await.unwrap().unwrap();
        assert_eq!(stored.secret_key, "sk_p1");
        assert_eq!(stored.allowed_domain.as_deref(), Some("example.com"));
        assert!(store.lookup_by_public_key("pk_other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_public_key_collision_is_error() {
        let store = MemoryStore::new();
        store.upsert_project(project("p1", "pk_1")).await.unwrap();
        assert!(store.upsert_project(project("p2", "pk_1")).await.is_err());
    }

    #[tokio::test]
    async fn test_set_allowed_domain() {
        let store = MemoryStore::new();
        store.upsert_project(project("p1", "pk_1")).await.unwrap();

        assert!(store
            .set_allowed_domain("pk_1", Some("example.com".into()))
            .await
            .unwrap());
        assert!(!store.set_allowed_domain("pk_missing", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_try_increment_caps_at_max() {
        let store = MemoryStore::new();
        assert_eq!(store.try_increment("pk", 0, 2).await.unwrap(), Some(1));
        assert_eq!(store.try_increment("pk", 0, 2).await.unwrap(), Some(2));
        assert_eq!(store.try_increment("pk", 0, 2).await.unwrap(), None);
        assert_eq!(store.window_count("pk", 0), Some(2));

        // Next window starts fresh.
        assert_eq!(store.try_increment("pk", 60_000, 2).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_purge_windows_before() {
        let store = MemoryStore::new();
        store.try_increment("pk", 0, 10).await.unwrap();
        store.try_increment("pk", 60_000, 10).await.unwrap();
        store.try_increment("pk", 120_000, 10).await.unwrap();

        assert_eq!(store.purge_windows_before(120_000).await.unwrap(), 2);
        assert_eq!(store.window_count("pk", 120_000), Some(1));
    }

    #[tokio::test]
    async fn test_insert_unique_is_per_project() {
        let store = MemoryStore::new();
        assert_eq!(store.insert_unique("p1", "h", 1).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(store.insert_unique("p1", "h", 2).await.unwrap(), InsertOutcome::Duplicate);
        assert_eq!(store.insert_unique("p2", "h", 1).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(store.replay_record_count(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_increments_never_exceed_max() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut admitted = 0u32;
                for _ in 0..50 {
                    if store.try_increment("pk", 0, 100).await.unwrap().is_some() {
                        admitted += 1;
                    }
                }
                admitted
            }));
        }

        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap();
        }
        assert_eq!(total, 100);
        assert_eq!(store.window_count("pk", 0), Some(100));
    }
}
