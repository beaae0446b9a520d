//! Attribute extraction for emitted spans (§4.6.4).

use std::collections::HashMap;

use serde_json::Value;
use th_domain::run::Run;

#[derive(Debug, Clone, Copy)]
pub struct AttrCaps {
    pub top_level_len: usize,
    pub nested_len: usize,
    pub list_cap: usize,
}

impl Default for AttrCaps {
    fn default() -> Self {
        Self {
            top_level_len: 500,
            nested_len: 200,
            list_cap: 5,
        }
    }
}

pub(crate) fn stringify_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

fn flatten(prefix: &str, value: &Value, caps: &AttrCaps, depth: usize, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            for (key, v) in map {
                flatten(&format!("{prefix}.{key}"), v, caps, depth + 1, out);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().take(caps.list_cap).enumerate() {
                flatten(&format!("{prefix}.{i}"), v, caps, depth + 1, out);
            }
        }
        other => {
            let cap = if depth == 0 { caps.top_level_len } else { caps.nested_len };
            out.push((prefix.to_string(), truncate(&stringify_scalar(other), cap)));
        }
    }
}

fn flatten_map(prefix: &str, map: &HashMap<String, Value>, caps: &AttrCaps, out: &mut Vec<(String, String)>) {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    for key in keys {
        flatten(&format!("{prefix}.{key}"), &map[key], caps, 1, out);
    }
}

/// Builds the full attribute set for a root or child span emitted for `run`
/// (§4.6.4). Values are stringified and length-capped.
pub fn build_run_attributes(run: &Run, caps: &AttrCaps) -> Vec<(String, String)> {
    let mut out = Vec::new();

    out.push(("run.id".to_string(), run.id.to_string()));
    out.push(("run.type".to_string(), format!("{:?}", run.run_type).to_lowercase()));
    out.push(("run.status".to_string(), format!("{:?}", run.status).to_lowercase()));
    if let Some(project) = &run.project_name {
        out.push(("project.name".to_string(), truncate(project, caps.top_level_len)));
    }
    if let Some(parent) = run.parent_run_id {
        out.push(("parent_run.id".to_string(), parent.to_string()));
    }
    if let Some(trace_id) = run.extra.get("otlp.trace_id").and_then(|v| v.as_str()) {
        out.push(("trace.id".to_string(), trace_id.to_string()));
    }
    if let Some(start) = run.start_time {
        out.push(("run.start_time".to_string(), start.to_rfc3339()));
    }
    if let Some(end) = run.end_time {
        out.push(("run.end_time".to_string(), end.to_rfc3339()));
    }
    if let (Some(start), Some(end)) = (run.start_time, run.end_time) {
        let duration_ms = (end - start).num_milliseconds();
        out.push(("run.duration_ms".to_string(), duration_ms.to_string()));
    }

    flatten_map("inputs", &run.inputs, caps, &mut out);
    if let Some(outputs) = &run.outputs {
        flatten_map("outputs", outputs, caps, &mut out);
    }
    for (i, tag) in run.tags.iter().take(caps.list_cap).enumerate() {
        out.push((format!("tag.{i}"), truncate(tag, caps.nested_len)));
    }
    flatten_map("extra", &run.extra, caps, &mut out);

    out
}
