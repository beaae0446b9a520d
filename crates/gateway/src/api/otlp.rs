//! OTLP HTTP ingress (§6.2): `POST {otlp.http_path}` with a protobuf
//! `ExportTraceServiceRequest` body, gzip `content-encoding` honored.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{CONTENT_ENCODING, CONTENT_TYPE};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceResponse;
use prost::Message;

use th_domain::Result;

use crate::state::AppState;

pub async fn ingest(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Response> {
    let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()).unwrap_or("");
    if !content_type.starts_with("application/x-protobuf") {
        return Err(th_domain::Error::ClientFormat(format!(
            "unsupported content-type {content_type:?}, expected application/x-protobuf"
        )));
    }

    let content_encoding = headers.get(CONTENT_ENCODING).and_then(|v| v.to_str().ok());

    let items = th_otlp::request_to_upserts(&body, content_encoding)?;
    let outcome = state.engine.upsert_batch(items).await?;
    if !outcome.errors.is_empty() {
        tracing::warn!(errors = ?outcome.errors, "otlp http batch had per-span errors");
    }

    let response = ExportTraceServiceResponse { partial_success: None };
    Ok(([(CONTENT_TYPE, "application/x-protobuf")], response.encode_to_vec()).into_response())
}
