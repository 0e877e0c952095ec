//! Axum HTTP gateway exposing job discovery, preview/validate/export,
//! per-prompt session state, build-hook operations, artifact serving, and
//! an SSE pipeline-run/stop pair, built on `axum::Router` + `CorsLayer` +
//! `axum::serve`.

mod handlers;
mod server;
mod state;

pub use server::{start_gateway, GatewayConfig};
pub use state::AppState;
