//! Store outages, concurrency and the durable backend.

use std::sync::Arc;

use ingest_gate::config::{StorageBackend, StorageConfig};
use ingest_gate::security::{FailurePolicy, Signer};
use ingest_gate::store::{MemoryStore, SqliteStore, Stores};
use serde_json::{json, Value};

mod common;

use common::{post_event, start_gate, test_config, FailingStore};

fn signed(payload: Value, secret: &str) -> Value {
    Signer::new(secret).unwrap().sign(&payload).unwrap().into_payload()
}

#[tokio::test]
async fn test_replay_outage_fails_open_by_default() {
    let gate = start_gate(test_config(), Stores::shared(Arc::new(FailingStore::default()))).await;
    let body = signed(json!({"projectKey": "pk_abc", "event": "x"}), "sk_xyz");

    let (status, _) = post_event(&gate, &body, None).await;
    assert_eq!(status, 200);
    assert_eq!(gate.state.stats.snapshot().degraded, 1);
}

#[tokio::test]
async fn test_replay_outage_fails_closed_when_configured() {
    let mut config = test_config();
    config.replay.on_store_error = FailurePolicy::Closed;
    let gate = start_gate(config, Stores::shared(Arc::new(FailingStore::default()))).await;
    let body = signed(json!({"projectKey": "pk_abc", "event": "x"}), "sk_xyz");

    let (status, resp) = post_event(&gate, &body, None).await;
    assert_eq!(status, 503);
    assert_eq!(resp["reason"], "store_unavailable");
    assert!(!resp.to_string().contains("injected"));
}

#[tokio::test]
async fn test_rate_outage_policies() {
    let body = json!({"projectKey": "pk_open", "event": "x"});

    let open = start_gate(test_config(), Stores::shared(Arc::new(FailingStore::default()))).await;
    let (status, _) = post_event(&open, &body, None).await;
    assert_eq!(status, 200);

    let mut config = test_config();
    config.rate_limit.on_store_error = FailurePolicy::Closed;
    let closed = start_gate(config, Stores::shared(Arc::new(FailingStore::default()))).await;
    let (status, resp) = post_event(&closed, &body, None).await;
    assert_eq!(status, 503);
    assert_eq!(resp["reason"], "store_unavailable");
}

#[tokio::test]
async fn test_project_store_outage_is_unavailable() {
    let gate = start_gate(test_config(), Stores::shared(Arc::new(FailingStore::projects_down()))).await;

    let (status, resp) = post_event(&gate, &json!({"projectKey": "pk_open"}), None).await;
    assert_eq!(status, 503);
    assert_eq!(resp["reason"], "store_unavailable");
    assert_eq!(gate.state.stats.snapshot().unavailable, 1);
}

#[tokio::test]
async fn test_concurrent_replays_admit_exactly_one() {
    let gate = Arc::new(
        start_gate(test_config(), Stores::shared(Arc::new(MemoryStore::new()))).await,
    );
    let body = signed(json!({"projectKey": "pk_abc", "event": "x"}), "sk_xyz");

    let mut handles = Vec::new();
    for _ in 0..16 {
        let gate = gate.clone();
        let body = body.clone();
        handles.push(tokio::spawn(async move { post_event(&gate, &body, None).await.0 }));
    }

    let mut accepted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            200 => accepted += 1,
            403 => {}
            other => panic!("unexpected status {other}"),
        }
    }
    assert_eq!(accepted, 1);
}

#[tokio::test]
async fn test_sqlite_backend_remembers_signatures_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let storage = StorageConfig {
        backend: StorageBackend::Sqlite,
        path: dir.path().join("gate.db").to_string_lossy().into_owned(),
        ..StorageConfig::default()
    };
    let mut config = test_config();
    config.storage = storage.clone();
    let body = signed(json!({"projectKey": "pk_abc", "event": "x"}), "sk_xyz");

    {
        let gate = start_gate(config.clone(), Stores::open(&storage).unwrap()).await;
        let (status, _) = post_event(&gate, &body, None).await;
        assert_eq!(status, 200);
    }

    let reopened = Stores::shared(Arc::new(SqliteStore::open(&storage).unwrap()));
    let gate = start_gate(config, reopened).await;
    let (status, resp) = post_event(&gate, &body, None).await;
    assert_eq!(status, 403);
    assert_eq!(resp["reason"], "replay_detected");
}
