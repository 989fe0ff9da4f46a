//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use ingest_gate::admin::serve_admin;
use ingest_gate::config::{GateConfig, ProjectConfig};
use ingest_gate::http::{AppState, HttpServer};
use ingest_gate::lifecycle::Shutdown;
use ingest_gate::sink::MemorySink;
use ingest_gate::store::{
    InsertOutcome, MemoryStore, Project, ProjectStore, RateWindowStore, ReplayStore, StoreError,
    Stores,
};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

pub const CREDENTIAL: &str = "test-credential";
pub const ADMIN_KEY: &str = "admin-test-key";

pub fn project(id: &str, public_key: &str, secret_key: &str, domain: Option<&str>) -> ProjectConfig {
    ProjectConfig {
        id: id.into(),
        public_key: public_key.into(),
        secret_key: secret_key.into(),
        allowed_domain: domain.map(Into::into),
        signed_only: false,
    }
}

/// Two projects: `pk_abc` restricted to example.com, `pk_open` unrestricted.
pub fn test_config() -> GateConfig {
    let mut config = GateConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.auth.credential = CREDENTIAL.into();
    config.rate_limit.max_per_window = 5;
    config.rate_limit.window_ms = 3_600_000;
    config.admin.enabled = true;
    config.admin.api_key = ADMIN_KEY.into();
    config.observability.metrics_enabled = false;
    config.projects = vec![
        project("p1", "pk_abc", "sk_xyz", Some("example.com")),
        project("p2", "pk_open", "sk_open", None),
    ];
    config
}

pub struct TestGate {
    pub addr: SocketAddr,
    pub admin_addr: SocketAddr,
    pub state: AppState,
    pub sink: Arc<MemorySink>,
    pub config_tx: mpsc::UnboundedSender<GateConfig>,
    pub shutdown: Shutdown,
}

impl TestGate {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn admin_url(&self, path: &str) -> String {
        format!("http://{}{}", self.admin_addr, path)
    }
}

impl Drop for TestGate {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Start the gate and its admin API on ephemeral ports.
pub async fn start_gate(config: GateConfig, stores: Stores) -> TestGate {
    stores.seed_projects(&config.projects).await.unwrap();

    let sink = Arc::new(MemorySink::new(config.sink.buffer_capacity));
    let server = HttpServer::new(config, stores, sink.clone());
    let state = server.state().clone();

    let shutdown = Shutdown::new();
    let (config_tx, config_updates) = mpsc::unbounded_channel();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, config_updates, server_shutdown).await;
    });

    let admin_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let admin_addr = admin_listener.local_addr().unwrap();
    let admin_state = state.clone();
    let admin_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = serve_admin(admin_listener, admin_state, admin_shutdown).await;
    });

    TestGate {
        addr,
        admin_addr,
        state,
        sink,
        config_tx,
        shutdown,
    }
}

pub async fn start_default_gate() -> TestGate {
    start_gate(test_config(), Stores::shared(Arc::new(MemoryStore::new()))).await
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// POST a body to the ingest endpoint with the test credential.
pub async fn post_event(
    gate: &TestGate,
    body: &Value,
    origin: Option<&str>,
) -> (u16, Value) {
    let mut request = client()
        .post(gate.url("/api/v1/events"))
        .bearer_auth(CREDENTIAL)
        .json(body);
    if let Some(origin) = origin {
        request = request.header("Origin", origin);
    }
    let res = request.send().await.expect("gate unreachable");
    let status = res.status().as_u16();
    (status, res.json().await.unwrap_or(Value::Null))
}

/// Serves projects from memory; replay and rate-window calls fail.
///
/// With `projects_down`, project lookups fail too.
#[derive(Default)]
pub struct FailingStore {
    projects: MemoryStore,
    pub projects_down: bool,
}

impl FailingStore {
    pub fn projects_down() -> Self {
        Self {
            projects: MemoryStore::new(),
            projects_down: true,
        }
    }
}

fn outage() -> StoreError {
    StoreError::Unavailable("injected outage".into())
}

#[async_trait]
impl ProjectStore for FailingStore {
    async fn lookup_by_public_key(&self, public_key: &str) -> Result<Option<Project>, StoreError> {
        if self.projects_down {
            return Err(outage());
        }
        self.projects.lookup_by_public_key(public_key).await
    }

    async fn upsert_project(&self, project: Project) -> Result<(), StoreError> {
        self.projects.upsert_project(project).await
    }

    async fn set_allowed_domain(
        &self,
        public_key: &str,
        allowed_domain: Option<String>,
    ) -> Result<bool, StoreError> {
        self.projects.set_allowed_domain(public_key, allowed_domain).await
    }
}

#[async_trait]
impl RateWindowStore for FailingStore {
    async fn try_increment(&self, _: &str, _: i64, _: u32) -> Result<Option<u32>, StoreError> {
        Err(outage())
    }

    async fn purge_windows_before(&self, _: i64) -> Result<u64, StoreError> {
        Err(outage())
    }
}

#[async_trait]
impl ReplayStore for FailingStore {
    async fn insert_unique(&self, _: &str, _: &str, _: i64) -> Result<InsertOutcome, StoreError> {
        Err(outage())
    }
}
