//! Stable run-id derivation for OTLP-sourced runs (§3.1, §4.2, invariant 5).

use uuid::Uuid;

/// `uuid5(namespace, trace_id_hex || ":" || span_id_hex)`, using the
/// standard OID namespace as `namespace_oid`.
pub fn run_id(trace_id: &[u8], span_id: &[u8]) -> Uuid {
    let name = format!("{}:{}", hex::encode(trace_id), hex::encode(span_id));
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
}

/// Returns `None` when `parent_span_id` is all-zero/empty (no parent).
pub fn parent_run_id(trace_id: &[u8], parent_span_id: &[u8]) -> Option<Uuid> {
    if parent_span_id.is_empty() || parent_span_id.iter().all(|b| *b == 0) {
        return None;
    }
    Some(run_id(trace_id, parent_span_id))
}

mod hex {
    pub fn encode(bytes: &[u8]) -> String {
        let mut out = String::with_capacity(bytes.len() * 2);
        for b in bytes {
            out.push_str(&format!("{b:02x}"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_is_pure_function_of_trace_and_span() {
        let trace = [1u8; 16];
        let span = [2u8; 8];
        assert_eq!(run_id(&trace, &span), run_id(&trace, &span));
    }

    #[test]
    fn different_span_yields_different_id() {
        let trace = [1u8; 16];
        assert_ne!(run_id(&trace, &[2u8; 8]), run_id(&trace, &[3u8; 8]));
    }

    #[test]
    fn zero_parent_span_id_has_no_parent() {
        assert!(parent_run_id(&[1u8; 16], &[0u8; 8]).is_none());
        assert!(parent_run_id(&[1u8; 16], &[]).is_none());
    }

    #[test]
    fn nonzero_parent_span_id_derives_parent() {
        let trace = [1u8; 16];
        let parent_span = [9u8; 8];
        assert_eq!(
            parent_run_id(&trace, &parent_span).unwrap(),
            run_id(&trace, &parent_span)
        );
    }
}
