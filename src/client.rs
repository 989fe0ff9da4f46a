//! HTTP client for the ingest endpoint.
//!
//! Browser-style callers send unsigned payloads with an `Origin`; server
//! callers attach a [`Signer`] and every payload is signed before sending.

use reqwest::{header, Client};
use serde_json::Value;

use crate::http::IngestResponse;
use crate::security::{Signer, SignerError};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("signing failed: {0}")]
    Sign(#[from] SignerError),
    #[error("gate rejected the request ({status}): {reason}: {message}")]
    Rejected {
        status: u16,
        reason: String,
        message: String,
    },
}

pub struct IngestClient {
    client: Client,
    base_url: String,
    credential: String,
    signer: Option<Signer>,
    origin: Option<String>,
}

impl IngestClient {
    pub fn new(base_url: &str, credential: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            credential: credential.into(),
            signer: None,
            origin: None,
        }
    }

    /// Sign every payload (backend mode).
    pub fn with_signer(mut self, signer: Signer) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Send this `Origin` header (frontend mode with a domain restriction).
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// The exact body that would be sent for `payload`.
    pub fn prepare(&self, payload: &Value) -> Result<Value, ClientError> {
        match &self.signer {
            Some(signer) => Ok(signer.sign(payload)?.into_payload()),
            None => Ok(payload.clone()),
        }
    }

    pub async fn send(&self, payload: &Value) -> Result<IngestResponse, ClientError> {
        let body = self.prepare(payload)?;

        let mut request = self
            .client
            .post(format!("{}/api/v1/events", self.base_url))
            .header(header::AUTHORIZATION, format!("Bearer {}", self.credential))
            .json(&body);
        if let Some(origin) = &self.origin {
            request = request.header(header::ORIGIN, origin);
        }

        let resp = request.send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        match serde_json::from_str::<IngestResponse>(&text) {
            Ok(parsed) if parsed.success => Ok(parsed),
            Ok(parsed) => Err(ClientError::Rejected {
                status: status.as_u16(),
                reason: parsed.reason.unwrap_or_default(),
                message: parsed.message.unwrap_or_default(),
            }),
            Err(_) => Err(ClientError::Rejected {
                status: status.as_u16(),
                reason: "unexpected_response".into(),
                message: text,
            }),
        }
    }
}
