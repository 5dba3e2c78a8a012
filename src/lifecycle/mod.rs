//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → accept loop stops → sessions close → drain with deadline
//! ```
//!
//! # Design Decisions
//! - Shutdown has a deadline: sessions still open after it are abandoned

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
