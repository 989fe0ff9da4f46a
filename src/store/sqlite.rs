//! SQLite-backed durable store.
//!
//! One connection guarded by a mutex; every call runs on the blocking pool so
//! the async request path never blocks a runtime worker on disk I/O.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, ErrorCode, OpenFlags, OptionalExtension};

use crate::config::StorageConfig;
use crate::store::{InsertOutcome, Project, ProjectStore, RateWindowStore, ReplayStore, StoreError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS projects (
    id             TEXT PRIMARY KEY,
    public_key     TEXT NOT NULL UNIQUE,
    secret_key     TEXT NOT NULL,
    allowed_domain TEXT,
    signed_only    INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS rate_windows (
    project_key   TEXT NOT NULL,
    window_start  INTEGER NOT NULL,
    request_count INTEGER NOT NULL,
    PRIMARY KEY (project_key, window_start)
);
CREATE TABLE IF NOT EXISTS replay_records (
    project_id     TEXT NOT NULL,
    signature_hash TEXT NOT NULL,
    timestamp      INTEGER NOT NULL,
    PRIMARY KEY (project_id, signature_hash)
);
";

#[derive(Clone)]
pub struct SqliteStore {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (creating if needed) the database named in the storage config.
    pub fn open(config: &StorageConfig) -> Result<Self, StoreError> {
        let path = Path::new(&config.path);
        if path.is_dir() {
            return Err(StoreError::Backend(format!(
                "store path must be a file, not a directory: {}",
                config.path
            )));
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let connection = Connection::open_with_flags(path, flags)?;
        connection.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        connection.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        Self::initialize(connection)
    }

    /// Private in-memory database, mainly for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(connection: Connection) -> Result<Self, StoreError> {
        connection.execute_batch(SCHEMA)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_connection<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let connection = self.connection.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = connection
                .lock()
                .map_err(|_| StoreError::Unavailable("sqlite connection mutex poisoned".to_string()))?;
            f(&mut *guard)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("sqlite task failed: {}", e)))?
    }
}

fn map_project(row: &rusqlite::Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        public_key: row.get(1)?,
        secret_key: row.get(2)?,
        allowed_domain: row.get(3)?,
        signed_only: row.get::<_, i64>(4)? != 0,
    })
}

#[async_trait]
impl ProjectStore for SqliteStore {
    async fn lookup_by_public_key(&self, public_key: &str) -> Result<Option<Project>, StoreError> {
        let public_key = public_key.to_string();
        self.with_connection(move |conn| {
            let project = conn
                .query_row(
                    "SELECT id, public_key, secret_key, allowed_domain, signed_only
                     FROM projects WHERE public_key = ?1",
                    params![public_key],
                    map_project,
                )
                .optional()?;
            Ok(project)
        })
        .await
    }

    async fn upsert_project(&self, project: Project) -> Result<(), StoreError> {
        self.with_connection(move |conn| {
            conn.execute(
                "INSERT INTO projects (id, public_key, secret_key, allowed_domain, signed_only)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                     allowed_domain = excluded.allowed_domain,
                     signed_only = excluded.signed_only",
                params![
                    project.id,
                    project.public_key,
                    project.secret_key,
                    project.allowed_domain,
                    project.signed_only as i64,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn set_allowed_domain(
        &self,
        public_key: &str,
        allowed_domain: Option<String>,
    ) -> Result<bool, StoreError> {
        let public_key = public_key.to_string();
        self.with_connection(move |conn| {
            let updated = conn.execute(
                "UPDATE projects SET allowed_domain = ?1 WHERE public_key = ?2",
                params![allowed_domain, public_key],
            )?;
            Ok(updated > 0)
        })
        .await
    }
}

#[async_trait]
impl RateWindowStore for SqliteStore {
    async fn try_increment(
        &self,
        project_key: &str,
        window_start: i64,
        max: u32,
    ) -> Result<Option<u32>, StoreError> {
        let project_key = project_key.to_string();
        self.with_connection(move |conn| {
            // The conditional DO UPDATE returns no row once the window is full.
            let count = conn
                .query_row(
                    "INSERT INTO rate_windows (project_key, window_start, request_count)
                     VALUES (?1, ?2, 1)
                     ON CONFLICT(project_key, window_start) DO UPDATE SET
                         request_count = rate_windows.request_count + 1
                     WHERE rate_windows.request_count < ?3
                     RETURNING request_count",
                    params![project_key, window_start, max as i64],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?;
            Ok(count.map(|c| c as u32))
        })
        .await
    }

    async fn purge_windows_before(&self, window_start: i64) -> Result<u64, StoreError> {
        self.with_connection(move |conn| {
            let removed = conn.execute(
                "DELETE FROM rate_windows WHERE window_start < ?1",
                params![window_start],
            )?;
            Ok(removed as u64)
        })
        .await
    }
}

#[async_trait]
impl ReplayStore for SqliteStore {
    async fn insert_unique(
        &self,
        project_id: &str,
        signature_hash: &str,
        timestamp: i64,
    ) -> Result<InsertOutcome, StoreError> {
        let project_id = project_id.to_string();
        let signature_hash = signature_hash.to_string();
        self.with_connection(move |conn| {
            let result = conn.execute(
                "INSERT INTO replay_records (project_id, signature_hash, timestamp)
                 VALUES (?1, ?2, ?3)",
                params![project_id, signature_hash, timestamp],
            );
            match result {
                Ok(_) => Ok(InsertOutcome::Inserted),
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == ErrorCode::ConstraintViolation =>
                {
                    Ok(InsertOutcome::Duplicate)
                }
                Err(err) => Err(err.into()),
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
    async fn test_project_roundtrip_and_domain_update() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert_project(project("p1", "pk_1")).await.unwrap();

        assert!(store
            .set_allowed_domain("pk_1", Some("example.com".into()))
            .await
            .unwrap());
        let stored = store.lookup_by_public_key("pk_1").await.unwrap().unwrap();
        assert_eq!(stored.id, "p1");
        assert_eq!(stored.allowed_domain.as_deref(), Some("example.com"));
        assert!(store.lookup_by_public_key("pk_2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_does_not_rotate_secret() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert_project(project("p1", "pk_1")).await.unwrap();

        let mut changed = project("p1", "pk_1");
        changed.secret_key = "sk_rotated".into();
        changed.signed_only = true;
        store.upsert_project(changed).await.unwrap();

        let stored = store.lookup_by_public_key("pk_1").await.unwrap().unwrap();
        assert_eq!(stored.secret_key, "sk_p1");
        assert!(stored.signed_only);
    }

    #[tokio::test]
    async fn test_insert_unique_reports_duplicate() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(
            store.insert_unique("p1", "abc", 10).await.unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            store.insert_unique("p1", "abc", 11).await.unwrap(),
            InsertOutcome::Duplicate
        );
        assert_eq!(
            store.insert_unique("p2", "abc", 10).await.unwrap(),
            InsertOutcome::Inserted
        );
    }

    #[tokio::test]
    async fn test_conditional_increment() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.try_increment("pk", 0, 2).await.unwrap(), Some(1));
        assert_eq!(store.try_increment("pk", 0, 2).await.unwrap(), Some(2));
        assert_eq!(store.try_increment("pk", 0, 2).await.unwrap(), None);
        assert_eq!(store.try_increment("pk", 0, 2).await.unwrap(), None);
        assert_eq!(store.try_increment("pk", 60_000, 2).await.unwrap(), Some(1));

        assert_eq!(store.purge_windows_before(60_000).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            path: dir.path().join("gate.db").to_string_lossy().into_owned(),
            ..StorageConfig::default()
        };

        {
            let store = SqliteStore::open(&config).unwrap();
            store.insert_unique("p1", "abc", 10).await.unwrap();
        }

        let reopened = SqliteStore::open(&config).unwrap();
        assert_eq!(
            reopened.insert_unique("p1", "abc", 10).await.unwrap(),
            InsertOutcome::Duplicate
        );
    }

    #[test]
    fn test_directory_path_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            path: dir.path().to_string_lossy().into_owned(),
            ..StorageConfig::default()
        };
        assert!(SqliteStore::open(&config).is_err());
    }
}
