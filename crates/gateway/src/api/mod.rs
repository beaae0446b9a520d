//! HTTP surface assembly (§6). Unlike the teacher's gateway, tracehub has
//! no bearer-token requirement, so there is no public/protected split here —
//! every route is open, matching §6/§7's silence on authentication.

pub mod batch;
pub mod dashboard;
pub mod info;
pub mod otlp;
pub mod ws;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let otlp_http_path = state.config.otlp.http_path.clone();

    Router::new()
        .route("/api/v1/runs/batch", post(batch::ingest))
        .route("/api/v1/info", get(info::info))
        .route("/api/v1/dashboard/runs/roots", get(dashboard::list_roots))
        .route("/api/v1/dashboard/runs/:trace_id/hierarchy", get(dashboard::hierarchy))
        .route("/api/v1/dashboard/stats/summary", get(dashboard::summary))
        .route("/api/v1/dashboard/cleanup/stale-runs", post(dashboard::cleanup_stale_runs))
        .route("/ws", get(ws::upgrade))
        .route(&otlp_http_path, post(otlp::ingest))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
