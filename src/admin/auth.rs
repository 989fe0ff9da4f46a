use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::http::server::AppState;

pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let expected = format!("Bearer {}", state.inner.load().config.admin.api_key);

    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    if let Some(auth_val) = auth_header {
        if bool::from(auth_val.as_bytes().ct_eq(expected.as_bytes())) {
            return Ok(next.run(request).await);
        }
    }

    tracing::warn!("Rejected admin request with bad credentials");
    Err(StatusCode::UNAUTHORIZED)
}
