//! OTLP Translator (C2): HTTP/gRPC ingress for OpenTelemetry trace export,
//! normalized into the `Run` upsert contract (§4.2).

pub mod codec;
pub mod grpc;
pub mod ids;
pub mod translate;

use std::collections::HashSet;

use th_domain::run::UpsertInput;
use th_domain::Error;
use uuid::Uuid;

pub use codec::decode_export_request;
pub use grpc::OtlpIngestSink;

/// Decodes an OTLP HTTP/protobuf body into upsert items, deduplicating
/// spans that repeat the same `(trace_id, span_id)` within one request
/// (§4.2 last sentence) by keeping only the first occurrence.
pub fn request_to_upserts(body: &[u8], content_encoding: Option<&str>) -> Result<Vec<UpsertInput>, Error> {
    let req = decode_export_request(body, content_encoding)?;
    let mut seen: HashSet<Uuid> = HashSet::new();
    let mut items = Vec::new();
    for (resource, span) in codec::iter_spans(&req) {
        let id = translate::span_identity(span);
        if !seen.insert(id) {
            tracing::warn!(run_id = %id, "dropping duplicate span within otlp request");
            continue;
        }
        items.push(UpsertInput::Create(translate::span_to_run_create(span, resource)));
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
    use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Span};
    use prost::Message;

    fn span(trace: u8, id: u8) -> Span {
        Span {
            trace_id: vec![trace; 16],
            span_id: vec![id; 8],
            parent_span_id: vec![],
            trace_state: String::new(),
            name: "span".to_string(),
            kind: 0,
            start_time_unix_nano: 1,
            end_time_unix_nano: 0,
            attributes: vec![],
            dropped_attributes_count: 0,
            events: vec![],
            dropped_events_count: 0,
            links: vec![],
            dropped_links_count: 0,
            status: None,
            flags: 0,
        }
    }

    #[test]
    fn duplicate_span_ids_within_a_request_are_deduped() {
        let req = ExportTraceServiceRequest {
            resource_spans: vec![ResourceSpans {
                resource: None,
                scope_spans: vec![ScopeSpans {
                    scope: None,
                    spans: vec![span(1, 2), span(1, 2), span(1, 3)],
                    schema_url: String::new(),
                }],
                schema_url: String::new(),
            }],
        };
        let body = req.encode_to_vec();
        let items = request_to_upserts(&body, None).unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn malformed_body_surfaces_otlp_decode_error() {
        let err = request_to_upserts(&[1, 2, 3, 4], None).unwrap_err();
        assert_eq!(err.kind(), "otlp_decode");
    }
}
