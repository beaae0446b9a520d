//! Wire decoding for the OTLP HTTP/protobuf ingress (§4.2, §6.3).
//!
//! Grounded on the request/response shape used by the downstream exporter's
//! own OTLP encoder (see the forwarder crate), mirrored here for the
//! receiving side: protobuf via `prost`, optional gzip via `flate2`.

use std::io::Read;

use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use prost::Message;

use th_domain::Error;

/// Decodes a protobuf-encoded `ExportTraceServiceRequest`, transparently
/// gunzipping the body first when `content_encoding` says `gzip`.
pub fn decode_export_request(
    body: &[u8],
    content_encoding: Option<&str>,
) -> Result<ExportTraceServiceRequest, Error> {
    let raw = match content_encoding {
        Some(enc) if enc.eq_ignore_ascii_case("gzip") => gunzip(body)?,
        _ => body.to_vec(),
    };
    ExportTraceServiceRequest::decode(raw.as_slice())
        .map_err(|e| Error::OtlpDecode(e.to_string()))
}

fn gunzip(body: &[u8]) -> Result<Vec<u8>, Error> {
    let mut decoder = flate2::read::GzDecoder::new(body);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::OtlpDecode(format!("gzip: {e}")))?;
    Ok(out)
}

/// Every (resource, scope, span) triple flattened out of a decoded request,
/// in wire order.
pub fn iter_spans(
    req: &ExportTraceServiceRequest,
) -> impl Iterator<Item = (Option<&opentelemetry_proto::tonic::resource::v1::Resource>, &opentelemetry_proto::tonic::trace::v1::Span)> {
    req.resource_spans.iter().flat_map(|rs| {
        let resource = rs.resource.as_ref();
        rs.scope_spans
            .iter()
            .flat_map(move |ss| ss.spans.iter().map(move |span| (resource, span)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Span};
    use std::io::Write;

    fn sample_request() -> ExportTraceServiceRequest {
        ExportTraceServiceRequest {
            resource_spans: vec![ResourceSpans {
                resource: None,
                scope_spans: vec![ScopeSpans {
                    scope: None,
                    spans: vec![Span {
                        trace_id: vec![1; 16],
                        span_id: vec![2; 8],
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
                    }],
                    schema_url: String::new(),
                }],
                schema_url: String::new(),
            }],
        }
    }

    #[test]
    fn decodes_plain_protobuf_body() {
        let req = sample_request();
        let body = req.encode_to_vec();
        let decoded = decode_export_request(&body, None).unwrap();
        assert_eq!(decoded.resource_spans.len(), 1);
    }

    #[test]
    fn decodes_gzip_encoded_body() {
        let req = sample_request();
        let body = req.encode_to_vec();
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&body).unwrap();
        let gzipped = encoder.finish().unwrap();
        let decoded = decode_export_request(&gzipped, Some("gzip")).unwrap();
        assert_eq!(decoded.resource_spans.len(), 1);
    }

    #[test]
    fn rejects_garbage_bytes() {
        let err = decode_export_request(&[0xff, 0x00, 0x01], None).unwrap_err();
        assert_eq!(err.kind(), "otlp_decode");
    }

    #[test]
    fn iter_spans_flattens_resource_scope_span_tree() {
        let req = sample_request();
        let spans: Vec<_> = iter_spans(&req).collect();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].1.name, "span");
    }
}
