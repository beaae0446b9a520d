//! LangSmith-compatible batch ingestion (§6.1).

use axum::extract::State;
use axum::Json;

use th_batch::{apply_project_name_policy, into_upsert_items, BatchRequest, BatchResponse};
use th_domain::Result;

use crate::state::AppState;

pub async fn ingest(
    State(state): State<AppState>,
    Json(mut req): Json<BatchRequest>,
) -> Result<Json<BatchResponse>> {
    apply_project_name_policy(&mut req);
    let items = into_upsert_items(req);

    let outcome = state.engine.upsert_batch(items).await?;

    Ok(Json(BatchResponse {
        success: outcome.errors.is_empty(),
        created_count: outcome.created,
        updated_count: outcome.updated,
        errors: outcome.errors,
    }))
}
