//! Ingestion admission gate library.

pub mod admin;
pub mod client;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;
pub mod sink;
pub mod store;

pub use config::GateConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
