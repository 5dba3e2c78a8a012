//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, session limits)
//!     → connection.rs (session id, lifetime tracking)
//!     → hand off to session::ProxySession
//! ```
//!
//! # Design Decisions
//! - Bounded accept prevents resource exhaustion
//! - Every session is tracked so shutdown can drain them

pub mod connection;
pub mod listener;
