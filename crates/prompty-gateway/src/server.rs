//! Router assembly and the `start_gateway` entry point, following the
//! teacher's `Router::new().route(...).layer(CorsLayer)` +
//! `axum::serve(TcpListener, app)` shape.

use crate::{handlers, state::AppState};
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub bind: String,
    pub port: u16,
    pub workspace_root: PathBuf,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8765,
            workspace_root: std::env::current_dir().unwrap_or_default(),
        }
    }
}

pub async fn start_gateway(config: GatewayConfig) -> anyhow::Result<()> {
    let state = Arc::new(AppState::new(config.workspace_root.clone()));

    let app = Router::new()
        .route("/health", get(handlers::health))
        .route("/jobs", get(handlers::list_jobs))
        .route("/job/:job_id", get(handlers::get_job))
        .route("/extensions", get(handlers::list_extensions))
        .route("/extension/:path", get(handlers::get_extension))
        .route("/preview", post(handlers::preview))
        .route("/validate", post(handlers::validate))
        .route("/export", post(handlers::export))
        .route("/job/:job_id/session", get(handlers::get_session).post(handlers::save_session))
        .route("/job/:job_id/operations", get(handlers::list_operations))
        .route(
            "/job/:job_id/operation/:name",
            get(handlers::get_operation).post(handlers::save_operation),
        )
        .route("/job/:job_id/pipeline/run", get(handlers::pipeline_run))
        .route("/job/:job_id/pipeline/stop", get(handlers::pipeline_stop))
        .route("/job/:job_id/artifacts", get(handlers::get_artifacts))
        .route("/job/:job_id/artifacts/:mod_id/:filename", get(handlers::get_artifact_file))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
        .with_state(state);

    let bind_addr: SocketAddr =
        format!("{}:{}", config.bind, config.port).parse().expect("invalid bind address");

    info!("Prompty gateway v{} starting", env!("CARGO_PKG_VERSION"));
    info!("  Listening on: {}", bind_addr);
    info!("  Workspace: {:?}", config.workspace_root);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
