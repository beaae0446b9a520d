//! `GET /api/v1/info` (§6.1) — static capability/version payload the
//! LangSmith-compatible SDK clients probe before sending a batch.

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use serde_json::Value;

use crate::state::AppState;

#[derive(Serialize)]
struct BatchIngestConfig {
    size_limit: u32,
    size_limit_bytes: u64,
    scale_up_qsize_trigger: u32,
    scale_up_nthreads_limit: u32,
    scale_down_nempty_trigger: u32,
}

#[derive(Serialize)]
struct InfoResponse {
    version: &'static str,
    license_expiration_time: Option<String>,
    batch_ingest_config: BatchIngestConfig,
    tenant_handle: &'static str,
}

pub async fn info(State(_state): State<AppState>) -> Json<Value> {
    let payload = InfoResponse {
        version: env!("CARGO_PKG_VERSION"),
        license_expiration_time: None,
        batch_ingest_config: BatchIngestConfig {
            size_limit: 100,
            size_limit_bytes: 20_971_520,
            scale_up_qsize_trigger: 1_000,
            scale_up_nthreads_limit: 16,
            scale_down_nempty_trigger: 4,
        },
        tenant_handle: "default",
    };
    Json(serde_json::to_value(payload).expect("InfoResponse always serializes"))
}
