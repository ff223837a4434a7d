//! Trust Oracle gateway library.
//!
//! Everything the binary wires together: configuration, the typed wire
//! frames, per-connection sessions, the derived-state orchestrator,
//! the connection registry, the scheduled batch task and the
//! management surface.

pub mod api;
pub mod config;
pub mod connections;
pub mod error;
pub mod messages;
pub mod pets;
pub mod scheduler;
pub mod server;
pub mod session;
