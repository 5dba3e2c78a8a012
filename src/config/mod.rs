//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → CLI flags / LISTEN_PORT / MONGO_CONNECTION_STRING overrides
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → shared via Arc with every session
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; sessions copy what they need at accept
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod upstream;
pub mod validation;

pub use loader::{load_config, resolve_config, ConfigError, Overrides};
pub use schema::{
    AuditConfig, CaptureConfig, CorrelationConfig, ListenerConfig, LogFormat, ObservabilityConfig, ProxyConfig,
    ShutdownConfig, UpstreamConfig,
};
pub use upstream::UpstreamAddr;
