//! Span → `RunCreate` conversion (§4.2).
//!
//! The translator always sets `outputs` to `Some` (possibly empty) whenever
//! the span carries an end time, and only ever sets `error` on a genuinely
//! failing span status. That keeps `Run::expected_status` (the single
//! completion-by-pattern rule shared with the batch translator and the
//! reconciliation engine) agreeing with OTLP's own "completed iff ended and
//! status ok" rule without an OTLP-specific special case.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use opentelemetry_proto::tonic::common::v1::{any_value::Value as AnyValueEnum, AnyValue, KeyValue};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::{span::SpanKind, status::StatusCode, Span};
use serde_json::Value;
use uuid::Uuid;

use th_domain::run::{RunCreate, RunEventRecord};

use crate::ids::{parent_run_id, run_id};

const LLM_KIND_ATTR: &str = "langsmith.span.kind";
const TAG_ATTR_KEYS: &[&str] = &["llm.vendor", "llm.request.model", "workflow.name", "step.name"];

fn any_value_to_json(value: &AnyValue) -> Value {
    match &value.value {
        Some(AnyValueEnum::StringValue(s)) => Value::String(s.clone()),
        Some(AnyValueEnum::BoolValue(b)) => Value::Bool(*b),
        Some(AnyValueEnum::IntValue(i)) => Value::from(*i),
        Some(AnyValueEnum::DoubleValue(d)) => {
            serde_json::Number::from_f64(*d).map(Value::Number).unwrap_or(Value::Null)
        }
        Some(AnyValueEnum::ArrayValue(arr)) => {
            Value::Array(arr.values.iter().map(any_value_to_json).collect())
        }
        Some(AnyValueEnum::KvlistValue(kv)) => {
            let mut map = serde_json::Map::new();
            for entry in &kv.values {
                if let Some(v) = &entry.value {
                    map.insert(entry.key.clone(), any_value_to_json(v));
                }
            }
            Value::Object(map)
        }
        Some(AnyValueEnum::BytesValue(b)) => Value::String(hex_encode(b)),
        None => Value::Null,
    }
}

fn as_string(value: &Value) -> Option<String> {
    value.as_str().map(str::to_string)
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

fn kv_to_json(attrs: &[KeyValue]) -> HashMap<String, Value> {
    attrs
        .iter()
        .filter_map(|kv| kv.value.as_ref().map(|v| (kv.key.clone(), any_value_to_json(v))))
        .collect()
}

fn nanos_to_datetime(nanos: u64) -> Option<DateTime<Utc>> {
    if nanos == 0 {
        return None;
    }
    Utc.timestamp_nanos(nanos as i64).into()
}

/// Indexed attribute view used to pull out the `llm.prompt.<i>.content` /
/// `llm.completion.<i>.content` families in numeric order.
fn indexed_family<'a>(attrs: &'a HashMap<String, Value>, prefix: &str, suffix: &str) -> Vec<(usize, &'a Value)> {
    let mut items: Vec<(usize, &Value)> = attrs
        .iter()
        .filter_map(|(k, v)| {
            let rest = k.strip_prefix(prefix)?;
            let index_str = rest.strip_suffix(suffix)?;
            index_str.parse::<usize>().ok().map(|i| (i, v))
        })
        .collect();
    items.sort_by_key(|(i, _)| *i);
    items
}

fn run_type_for(attrs: &HashMap<String, Value>) -> th_domain::run::RunType {
    use th_domain::run::RunType;

    let is_llm = attrs.keys().any(|k| k.starts_with("llm."))
        || matches!(attrs.get(LLM_KIND_ATTR).and_then(as_string).as_deref(), Some("LLM"));
    if is_llm {
        RunType::Llm
    } else {
        RunType::Chain
    }
}

fn resource_project_name(resource: Option<&Resource>) -> Option<String> {
    let resource = resource?;
    resource
        .attributes
        .iter()
        .find(|kv| kv.key == "service.name")
        .and_then(|kv| kv.value.as_ref())
        .map(any_value_to_json)
        .and_then(|v| as_string(&v))
}

fn build_inputs(attrs: &HashMap<String, Value>) -> HashMap<String, Value> {
    let mut inputs = HashMap::new();

    let prompts: Vec<Value> = indexed_family(attrs, "llm.prompt.", ".content")
        .into_iter()
        .filter_map(|(_, v)| v.as_str().map(|s| Value::String(s.to_string())))
        .collect();
    if !prompts.is_empty() {
        inputs.insert("prompts".to_string(), Value::Array(prompts));
    }

    for (key, value) in attrs {
        if let Some(stripped) = key.strip_prefix("input.").or_else(|| key.strip_prefix("request.")) {
            inputs.insert(stripped.to_string(), value.clone());
        }
    }
    if let Some(topic) = attrs.get("workflow.input.topic") {
        inputs.insert("topic".to_string(), topic.clone());
    }
    inputs
}

fn build_outputs(attrs: &HashMap<String, Value>) -> HashMap<String, Value> {
    let mut outputs = HashMap::new();

    let completions: Vec<Value> = indexed_family(attrs, "llm.completion.", ".content")
        .into_iter()
        .filter_map(|(_, v)| v.as_str().map(|s| Value::String(s.to_string())))
        .collect();
    if let Some(first) = completions.first() {
        outputs.insert("text".to_string(), first.clone());
    }
    if !completions.is_empty() {
        outputs.insert("completions".to_string(), Value::Array(completions));
    }

    for (key, value) in attrs {
        if let Some(stripped) = key.strip_prefix("output.") {
            outputs.insert(stripped.to_string(), value.clone());
        }
    }

    let usage: HashMap<&str, &str> = HashMap::from([
        ("prompt_tokens", "llm.usage.prompt_tokens"),
        ("completion_tokens", "llm.usage.completion_tokens"),
        ("total_tokens", "llm.usage.total_tokens"),
    ]);
    let mut usage_map = serde_json::Map::new();
    for (out_key, attr_key) in &usage {
        if let Some(v) = attrs.get(*attr_key) {
            usage_map.insert(out_key.to_string(), v.clone());
        }
    }
    if !usage_map.is_empty() {
        outputs.insert("usage".to_string(), Value::Object(usage_map));
    }
    outputs
}

fn build_tags(attrs: &HashMap<String, Value>, resource: Option<&Resource>) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    if let Some(resource) = resource {
        for kv in &resource.attributes {
            tags.push(kv.key.clone());
        }
    }
    for key in TAG_ATTR_KEYS {
        if let Some(value) = attrs.get(*key) {
            let rendered = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
            tags.push(format!("{key}={rendered}"));
        }
    }
    tags
}

fn build_events(span: &Span) -> Vec<RunEventRecord> {
    span.events
        .iter()
        .filter_map(|e| {
            nanos_to_datetime(e.time_unix_nano).map(|time| RunEventRecord {
                name: e.name.clone(),
                time,
                attributes: kv_to_json(&e.attributes),
            })
        })
        .collect()
}

/// Converts a single decoded span into the create payload the reconciliation
/// engine will upsert.
pub fn span_to_run_create(span: &Span, resource: Option<&Resource>) -> RunCreate {
    let id = run_id(&span.trace_id, &span.span_id);
    let parent = parent_run_id(&span.trace_id, &span.parent_span_id);

    let attrs = kv_to_json(&span.attributes);
    let run_type = run_type_for(&attrs);
    let inputs = build_inputs(&attrs);
    let outputs_content = build_outputs(&attrs);
    let tags = build_tags(&attrs, resource);
    let events = build_events(span);

    let start_time = nanos_to_datetime(span.start_time_unix_nano).unwrap_or_else(Utc::now);
    let end_time = nanos_to_datetime(span.end_time_unix_nano);

    let status_code = span
        .status
        .as_ref()
        .and_then(|s| StatusCode::try_from(s.code).ok())
        .unwrap_or(StatusCode::Unset);
    let error = match status_code {
        StatusCode::Error => Some("OTLP span error".to_string()),
        _ => None,
    };

    // Outputs become `Some` (possibly empty) as soon as the span has ended,
    // so `Run::expected_status` agrees with OTLP's own completion rule
    // regardless of whether any `output.*`/`llm.completion.*` attrs exist.
    let outputs = end_time.map(|_| outputs_content);

    let mut extra = attrs;
    extra.insert("otlp.trace_id".to_string(), Value::String(hex_encode(&span.trace_id)));
    extra.insert("otlp.span_id".to_string(), Value::String(hex_encode(&span.span_id)));
    extra.insert(
        "otlp.parent_span_id".to_string(),
        Value::String(hex_encode(&span.parent_span_id)),
    );
    if let Some(model) = extra.get("llm.request.model").cloned() {
        extra.insert("model".to_string(), model);
    }

    RunCreate {
        id,
        name: span.name.clone(),
        run_type,
        start_time,
        inputs,
        end_time,
        parent_run_id: parent,
        outputs,
        extra,
        serialized: None,
        events,
        tags,
        error,
        project_name: Some(resource_project_name(resource).unwrap_or_else(|| "unknown".to_string())),
        reference_example_id: None,
        session_name: None,
    }
}

/// Stable id a single span would receive, exposed for request-level
/// span-id-collision dedup (§4.2 last sentence).
pub fn span_identity(span: &Span) -> Uuid {
    run_id(&span.trace_id, &span.span_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_proto::tonic::trace::v1::status::StatusCode as ProtoStatusCode;
    use opentelemetry_proto::tonic::trace::v1::Status;

    fn attr(key: &str, value: &str) -> KeyValue {
        KeyValue {
            key: key.to_string(),
            value: Some(AnyValue {
                value: Some(AnyValueEnum::StringValue(value.to_string())),
            }),
        }
    }

    fn base_span() -> Span {
        Span {
            trace_id: vec![1; 16],
            span_id: vec![2; 8],
            parent_span_id: vec![],
            trace_state: String::new(),
            name: "call-llm".to_string(),
            kind: SpanKind::Internal as i32,
            start_time_unix_nano: 1_700_000_000_000_000_000,
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
    fn running_span_has_no_outputs() {
        let span = base_span();
        let run = span_to_run_create(&span, None);
        assert!(run.outputs.is_none());
        assert!(run.end_time.is_none());
    }

    #[test]
    fn ended_span_without_output_attrs_has_empty_outputs_map() {
        let mut span = base_span();
        span.end_time_unix_nano = 1_700_000_001_000_000_000;
        let run = span_to_run_create(&span, None);
        assert_eq!(run.outputs, Some(HashMap::new()));
        assert!(run.end_time.is_some());
    }

    #[test]
    fn input_and_output_attrs_are_split_out() {
        let mut span = base_span();
        span.end_time_unix_nano = 1_700_000_001_000_000_000;
        span.attributes = vec![attr("input.prompt", "hi"), attr("output.completion", "hello")];
        let run = span_to_run_create(&span, None);
        assert_eq!(run.inputs.get("prompt").unwrap(), "hi");
        assert_eq!(run.outputs.unwrap().get("completion").unwrap(), "hello");
    }

    #[test]
    fn llm_prompt_and_completion_families_are_ordered() {
        let mut span = base_span();
        span.end_time_unix_nano = 1_700_000_001_000_000_000;
        span.attributes = vec![
            attr("llm.prompt.1.content", "second"),
            attr("llm.prompt.0.content", "first"),
            attr("llm.completion.0.content", "answer"),
        ];
        let run = span_to_run_create(&span, None);
        assert_eq!(
            run.inputs.get("prompts").unwrap(),
            &Value::Array(vec![Value::String("first".into()), Value::String("second".into())])
        );
        let outputs = run.outputs.unwrap();
        assert_eq!(outputs.get("text").unwrap(), "answer");
    }

    #[test]
    fn workflow_input_topic_maps_to_topic_key() {
        let mut span = base_span();
        span.attributes = vec![attr("workflow.input.topic", "billing")];
        let run = span_to_run_create(&span, None);
        assert_eq!(run.inputs.get("topic").unwrap(), "billing");
    }

    #[test]
    fn failing_status_sets_generic_error_message() {
        let mut span = base_span();
        span.end_time_unix_nano = 1_700_000_001_000_000_000;
        span.status = Some(Status {
            message: "boom".to_string(),
            code: ProtoStatusCode::Error as i32,
        });
        let run = span_to_run_create(&span, None);
        assert_eq!(run.error.as_deref(), Some("OTLP span error"));
    }

    #[test]
    fn llm_attribute_prefix_sets_llm_run_type() {
        let mut span = base_span();
        span.attributes = vec![attr("llm.vendor", "openai")];
        let run = span_to_run_create(&span, None);
        assert_eq!(run.run_type, th_domain::run::RunType::Llm);
        assert!(run.tags.iter().any(|t| t == "llm.vendor=openai"));
    }

    #[test]
    fn zero_parent_span_id_yields_root_run() {
        let span = base_span();
        let run = span_to_run_create(&span, None);
        assert!(run.parent_run_id.is_none());
    }

    #[test]
    fn project_name_defaults_to_unknown_without_resource() {
        let span = base_span();
        let run = span_to_run_create(&span, None);
        assert_eq!(run.project_name.as_deref(), Some("unknown"));
    }
}
