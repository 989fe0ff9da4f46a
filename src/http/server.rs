//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with the ingest and health handlers
//! - Wire up middleware (CORS, limits, timeout, request ID, tracing)
//! - Swap gate state when a new config arrives
//! - Serve plain TCP or TLS until shutdown is broadcast

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method, Request},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    set_header::SetResponseHeaderLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::GateConfig;
use crate::http::handlers;
use crate::http::request::{request_id, MakeRequestUuidV4};
use crate::http::tls::load_tls_config;
use crate::security::{Mode, RequestValidator};
use crate::sink::EventSink;
use crate::store::janitor::WindowSource;
use crate::store::Stores;

/// How long in-flight requests may run after shutdown on the TLS path.
const TLS_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Config-derived state, replaced as a whole on reload.
pub struct GateState {
    pub config: GateConfig,
    pub validator: RequestValidator,
}

impl GateState {
    pub fn new(config: GateConfig, stores: &Stores) -> Self {
        let validator = RequestValidator::from_config(&config, stores);
        Self { config, validator }
    }
}

/// Process-wide admission counters for the admin API.
#[derive(Debug, Default)]
pub struct GateStats {
    accepted_backend: AtomicU64,
    accepted_frontend: AtomicU64,
    rejected: AtomicU64,
    unavailable: AtomicU64,
    degraded: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub accepted_backend: u64,
    pub accepted_frontend: u64,
    pub rejected: u64,
    pub unavailable: u64,
    pub degraded: u64,
}

impl GateStats {
    pub fn record_accepted(&self, mode: Mode, degraded: bool) {
        match mode {
            Mode::Backend => self.accepted_backend.fetch_add(1, Ordering::Relaxed),
            Mode::Frontend => self.accepted_frontend.fetch_add(1, Ordering::Relaxed),
        };
        if degraded {
            self.degraded.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unavailable(&self) {
        self.unavailable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted_backend: self.accepted_backend.load(Ordering::Relaxed),
            accepted_frontend: self.accepted_frontend.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            unavailable: self.unavailable.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
        }
    }
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub inner: Arc<ArcSwap<GateState>>,
    pub stores: Stores,
    pub sink: Arc<dyn EventSink>,
    pub stats: Arc<GateStats>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: GateConfig, stores: Stores, sink: Arc<dyn EventSink>) -> Self {
        let gate = GateState::new(config, &stores);
        Self {
            inner: Arc::new(ArcSwap::from_pointee(gate)),
            stores,
            sink,
            stats: Arc::new(GateStats::default()),
            started_at: Instant::now(),
        }
    }

    /// Seed projects from `config` and swap in a validator built from it.
    pub async fn apply_config(&self, config: GateConfig) {
        if let Err(e) = self.stores.seed_projects(&config.projects).await {
            tracing::error!(error = %e, "Failed to seed projects from reloaded config");
        }

        let current = self.inner.load();
        if current.config.listener.bind_address != config.listener.bind_address
            || current.config.storage.backend != config.storage.backend
            || current.config.storage.path != config.storage.path
        {
            tracing::warn!("Listener and storage changes take effect after restart");
        }

        self.inner.store(Arc::new(GateState::new(config, &self.stores)));
        tracing::info!("Gate configuration reloaded");
    }

    /// The live rate window size, following config reloads.
    pub fn window_source(&self) -> WindowSource {
        let inner = self.inner.clone();
        Arc::new(move || inner.load().config.rate_limit.window_ms)
    }
}

/// HTTP server for the ingestion gate.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    pub fn new(config: GateConfig, stores: Stores, sink: Arc<dyn EventSink>) -> Self {
        Self::with_state(AppState::new(config, stores, sink))
    }

    /// Build a server around existing state, e.g. one shared with the admin API.
    pub fn with_state(state: AppState) -> Self {
        let router = Self::build_router(&state.inner.load().config, state.clone());
        Self { router, state }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GateConfig, state: AppState) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

        Router::new()
            .route("/api/v1/events", post(handlers::ingest))
            .route("/health", get(handlers::health))
            .with_state(state)
            .layer(DefaultBodyLimit::disable())
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV4))
                    .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                        tracing::info_span!(
                            "request",
                            request_id = %request_id(request.headers()),
                            method = %request.method(),
                            path = %request.uri().path(),
                        )
                    }))
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(SetResponseHeaderLayer::overriding(
                        header::X_CONTENT_TYPE_OPTIONS,
                        HeaderValue::from_static("nosniff"),
                    ))
                    .layer(cors)
                    .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
                    .map_response(|res: axum::response::Response<_>| res.map(Body::new))
                    .layer(RequestBodyLimitLayer::new(config.listener.max_body_size)),
            )
    }

    /// Run the server until `shutdown` fires.
    ///
    /// New configs arriving on `config_updates` replace the gate state without
    /// dropping connections.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<GateConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        let tls = self.state.inner.load().config.listener.tls.clone();

        let reload_state = self.state.clone();
        let mut reload_shutdown = shutdown.resubscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    update = config_updates.recv() => match update {
                        Some(config) => reload_state.apply_config(config).await,
                        None => break,
                    },
                    _ = reload_shutdown.recv() => break,
                }
            }
        });

        match tls {
            Some(tls) => {
                let rustls = load_tls_config(Path::new(&tls.cert_path), Path::new(&tls.key_path)).await?;
                tracing::info!(address = %addr, "HTTPS server starting");

                let handle = axum_server::Handle::new();
                let drain = handle.clone();
                tokio::spawn(async move {
                    let _ = shutdown.recv().await;
                    drain.graceful_shutdown(Some(TLS_DRAIN_TIMEOUT));
                });

                axum_server::from_tcp_rustls(listener.into_std()?, rustls)
                    .handle(handle)
                    .serve(self.router.into_make_service())
                    .await?;
            }
            None => {
                tracing::info!(address = %addr, "HTTP server starting");
                axum::serve(listener, self.router)
                    .with_graceful_shutdown(async move {
                        let _ = shutdown.recv().await;
                    })
                    .await?;
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
