//! Vodworks API
//!
//! HTTP/JSON ingress over the scheduling core, plus the process wiring the
//! binary uses: telemetry, configuration, discovery self-registration, and
//! graceful shutdown.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;
pub mod telemetry;

pub use routes::router;
pub use state::AppState;
