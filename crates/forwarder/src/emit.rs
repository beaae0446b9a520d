//! Authoritative reassembly and synthetic OTel trace emission (§4.6.3).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::{any_value::Value as AnyValueEnum, AnyValue, KeyValue};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::{span::SpanKind, status::StatusCode, ResourceSpans, ScopeSpans, Span, Status};
use prost::Message;
use uuid::Uuid;

use th_domain::error::{Error, Result};
use th_domain::run::{Run, RunStatus};

use crate::attrs::{build_run_attributes, stringify_scalar, truncate, AttrCaps};
use crate::http_client::OtlpHttpSender;
use crate::steps;

fn kv_string(key: impl Into<String>, value: impl Into<String>) -> KeyValue {
    KeyValue {
        key: key.into(),
        value: Some(AnyValue {
            value: Some(AnyValueEnum::StringValue(value.into())),
        }),
    }
}

fn to_nanos(t: Option<DateTime<Utc>>) -> u64 {
    t.and_then(|t| t.timestamp_nanos_opt()).map(|n| n.max(0) as u64).unwrap_or(0)
}

fn trace_id_bytes(root_id: Uuid) -> Vec<u8> {
    root_id.as_bytes().to_vec()
}

fn span_id_bytes(id: Uuid) -> Vec<u8> {
    id.as_bytes()[0..8].to_vec()
}

fn step_span_id_bytes(run_id: Uuid, key: &str) -> Vec<u8> {
    let derived = Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("{run_id}:step:{key}").as_bytes());
    derived.as_bytes()[0..8].to_vec()
}

fn run_span_status(run: &Run) -> Option<Status> {
    match run.status {
        RunStatus::Failed => Some(Status {
            message: run.error.clone().unwrap_or_default(),
            code: StatusCode::Error as i32,
        }),
        RunStatus::Completed => Some(Status {
            message: String::new(),
            code: StatusCode::Ok as i32,
        }),
        RunStatus::Running => None,
    }
}

fn build_spans(
    run_id: Uuid,
    trace_id: &[u8],
    all: &HashMap<Uuid, Run>,
    children: &HashMap<Option<Uuid>, Vec<Uuid>>,
    caps: AttrCaps,
    max_step_spans: usize,
    out: &mut Vec<Span>,
) {
    let Some(run) = all.get(&run_id) else { return };
    let span_id = span_id_bytes(run_id);
    let parent_span_id = run
        .parent_run_id
        .filter(|p| all.contains_key(p))
        .map(span_id_bytes)
        .unwrap_or_default();

    let attributes: Vec<KeyValue> = build_run_attributes(run, &caps)
        .into_iter()
        .map(|(k, v)| kv_string(k, v))
        .collect();

    out.push(Span {
        trace_id: trace_id.to_vec(),
        span_id: span_id.clone(),
        parent_span_id,
        trace_state: String::new(),
        name: run.name.clone(),
        kind: SpanKind::Internal as i32,
        start_time_unix_nano: to_nanos(run.start_time),
        end_time_unix_nano: to_nanos(run.end_time),
        attributes,
        dropped_attributes_count: 0,
        events: Vec::new(),
        dropped_events_count: 0,
        links: Vec::new(),
        dropped_links_count: 0,
        status: run_span_status(run),
        flags: 0,
    });

    if let Some(outputs) = &run.outputs {
        if steps::is_step_like(outputs) {
            let mut keys: Vec<&String> = outputs.keys().collect();
            keys.sort();
            for key in keys.into_iter().take(max_step_spans) {
                let step_attrs = vec![
                    kv_string("step.key", key.clone()),
                    kv_string("step.value", truncate(&stringify_scalar(&outputs[key]), caps.nested_len)),
                ];
                out.push(Span {
                    trace_id: trace_id.to_vec(),
                    span_id: step_span_id_bytes(run_id, key),
                    parent_span_id: span_id.clone(),
                    trace_state: String::new(),
                    name: format!("Step: {}", steps::step_name(key)),
                    kind: SpanKind::Internal as i32,
                    start_time_unix_nano: to_nanos(run.start_time),
                    end_time_unix_nano: to_nanos(run.end_time),
                    attributes: step_attrs,
                    dropped_attributes_count: 0,
                    events: Vec::new(),
                    dropped_events_count: 0,
                    links: Vec::new(),
                    dropped_links_count: 0,
                    status: None,
                    flags: 0,
                });
            }
        }
    }

    if let Some(child_ids) = children.get(&Some(run_id)) {
        let mut child_ids = child_ids.clone();
        child_ids.sort_by_key(|id| {
            all.get(id).and_then(|r| r.start_time).unwrap_or(DateTime::<Utc>::MIN_UTC)
        });
        for child_id in child_ids {
            build_spans(child_id, trace_id, all, children, caps, max_step_spans, out);
        }
    }
}

/// Builds and sends a synthetic OTel trace for `root_id` rooted in `all`
/// (the merged authoritative + buffered run set). Child spans, including
/// synthetic step spans, are all ended before the root span per §4.6.3.
pub async fn emit_trace(
    client: &dyn OtlpHttpSender,
    endpoint: &str,
    all: &HashMap<Uuid, Run>,
    children: &HashMap<Option<Uuid>, Vec<Uuid>>,
    root_id: Uuid,
    caps: AttrCaps,
    max_step_spans: usize,
) -> Result<()> {
    let root = all
        .get(&root_id)
        .ok_or_else(|| Error::Forwarder(format!("root {root_id} missing from flush set")))?;

    let trace_id = trace_id_bytes(root_id);
    let mut spans = Vec::new();
    build_spans(root_id, &trace_id, all, children, caps, max_step_spans, &mut spans);

    let resource = Resource {
        attributes: vec![kv_string(
            "service.name",
            root.project_name.clone().unwrap_or_else(|| "tracehub".to_string()),
        )],
        dropped_attributes_count: 0,
    };
    let request = ExportTraceServiceRequest {
        resource_spans: vec![ResourceSpans {
            resource: Some(resource),
            scope_spans: vec![ScopeSpans {
                scope: None,
                spans,
                schema_url: String::new(),
            }],
            schema_url: String::new(),
        }],
    };

    client.send(endpoint, request.encode_to_vec()).await
}
