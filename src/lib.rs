//! Transparent MongoDB wire-protocol proxy with write auditing.
//!
//! Every byte between a client and its MongoDB server is forwarded
//! unchanged. Along the way OP_MSG write commands (insert, update, delete,
//! findAndModify) are decoded, matched with the server's reply, and handed
//! to an [`audit::AuditSink`].

pub mod audit;
pub mod config;
pub mod correlation;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod server;
pub mod session;
pub mod wire;

pub use audit::{AuditRecord, AuditSink};
pub use config::schema::ProxyConfig;
pub use lifecycle::Shutdown;
pub use server::ProxyServer;
pub use session::ProxySession;
