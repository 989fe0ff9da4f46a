//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs   (Axum setup, middleware, graceful shutdown)
//!     → request.rs  (request ID, header extraction)
//!     → handlers.rs (RequestValidator, then EventSink)
//!     → response.rs (status mapping, JSON body)
//!     → Send to client
//! ```

pub mod handlers;
pub mod request;
pub mod response;
pub mod server;
pub mod tls;

pub use request::X_REQUEST_ID;
pub use response::IngestResponse;
pub use server::{AppState, HttpServer};
