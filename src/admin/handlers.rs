use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::config::validation::is_bare_hostname;
use crate::config::StorageBackend;
use crate::http::server::{AppState, StatsSnapshot};
use crate::store::Project;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub storage: StorageBackend,
    pub tls: bool,
}

/// Public view of a project. The secret key is never exposed.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectView {
    pub id: String,
    pub public_key: String,
    pub allowed_domain: Option<String>,
    pub signed_only: bool,
}

impl From<Project> for ProjectView {
    fn from(project: Project) -> Self {
        Self {
            id: project.id,
            public_key: project.public_key,
            allowed_domain: project.allowed_domain,
            signed_only: project.signed_only,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DomainUpdate {
    /// `null` or empty removes the restriction.
    pub allowed_domain: Option<String>,
}

type AdminError = (StatusCode, Json<serde_json::Value>);

fn admin_error(status: StatusCode, message: &str) -> AdminError {
    (status, Json(serde_json::json!({ "error": message })))
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let inner = state.inner.load();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started_at.elapsed().as_secs(),
        storage: inner.config.storage.backend,
        tls: inner.config.listener.tls.is_some(),
    })
}

pub async fn get_stats(State(state): State<AppState>) -> Json<StatsSnapshot> {
    Json(state.stats.snapshot())
}

pub async fn get_project(
    State(state): State<AppState>,
    Path(public_key): Path<String>,
) -> Result<Json<ProjectView>, AdminError> {
    match state.stores.projects.lookup_by_public_key(&public_key).await {
        Ok(Some(project)) => Ok(Json(project.into())),
        Ok(None) => Err(admin_error(StatusCode::NOT_FOUND, "project not found")),
        Err(e) => {
            tracing::error!(error = %e, "Project lookup failed");
            Err(admin_error(StatusCode::SERVICE_UNAVAILABLE, "store unavailable"))
        }
    }
}

pub async fn set_domain(
    State(state): State<AppState>,
    Path(public_key): Path<String>,
    Json(update): Json<DomainUpdate>,
) -> Result<Json<ProjectView>, AdminError> {
    let domain = update
        .allowed_domain
        .map(|d| d.trim().to_ascii_lowercase())
        .filter(|d| !d.is_empty());
    if let Some(domain) = &domain {
        if !is_bare_hostname(domain) {
            return Err(admin_error(
                StatusCode::BAD_REQUEST,
                "allowed_domain must be a bare hostname such as example.com",
            ));
        }
    }

    let projects = &state.stores.projects;
    let unavailable = |e: crate::store::StoreError| {
        tracing::error!(error = %e, "Domain update failed");
        admin_error(StatusCode::SERVICE_UNAVAILABLE, "store unavailable")
    };

    if !projects
        .set_allowed_domain(&public_key, domain.clone())
        .await
        .map_err(unavailable)?
    {
        return Err(admin_error(StatusCode::NOT_FOUND, "project not found"));
    }
    tracing::info!(public_key = %public_key, allowed_domain = ?domain, "Allowed domain updated");

    match projects.lookup_by_public_key(&public_key).await.map_err(unavailable)? {
        Some(project) => Ok(Json(project.into())),
        None => Err(admin_error(StatusCode::NOT_FOUND, "project not found")),
    }
}
