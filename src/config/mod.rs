//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GateConfig (validated, immutable)
//!     → shared via ArcSwap with the HTTP server
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → server swaps its gate state atomically
//!     → in-flight requests finish on the old state
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Storage backend and listener addresses are read once at startup

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, AuthConfig, GateConfig, ListenerConfig, LogFormat, ObservabilityConfig,
    ProjectConfig, RateLimitConfig, ReplayConfig, SignatureConfig, SinkConfig, StorageBackend,
    StorageConfig, TimeoutConfig, TlsConfig,
};
