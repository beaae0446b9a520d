use serde::Serialize;
use uuid::Uuid;

/// Internal structured-logging events for the ingestion pipeline. Distinct
/// from the client-facing live-stream events in `th-eventbus`: these exist
/// purely to make the reconciliation/forwarder state machines legible in
/// logs, and are never delivered to a live-stream subscriber.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum DiagnosticEvent {
    DeferredUpdateEnqueued { run_id: Uuid, reason: String },
    DeferredUpdateReplayed { run_id: Uuid },
    StatusAdjusted { run_id: Uuid, from: String, to: String },
    StatusDowngradeDropped { run_id: Uuid, from: String, attempted: String },
    StaleRunFailed { run_id: Uuid, minutes_running: i64 },
    BucketMerged { from_key: String, into_key: String },
    BucketFlushed { key: String, run_count: usize },
    ForwarderFailed { key: String, reason: String },
}

impl DiagnosticEvent {
    pub fn emit(&self) {
        match self {
            DiagnosticEvent::DeferredUpdateEnqueued { run_id, reason } => {
                tracing::info!(%run_id, reason, "deferred update enqueued")
            }
            DiagnosticEvent::DeferredUpdateReplayed { run_id } => {
                tracing::info!(%run_id, "deferred update replayed")
            }
            DiagnosticEvent::StatusAdjusted { run_id, from, to } => {
                tracing::warn!(%run_id, from, to, "status adjusted by consistency validation")
            }
            DiagnosticEvent::StatusDowngradeDropped { run_id, from, attempted } => {
                tracing::warn!(%run_id, from, attempted, "status downgrade dropped")
            }
            DiagnosticEvent::StaleRunFailed { run_id, minutes_running } => {
                tracing::warn!(%run_id, minutes_running, "stale run marked failed")
            }
            DiagnosticEvent::BucketMerged { from_key, into_key } => {
                tracing::info!(from_key, into_key, "forward group bucket merged")
            }
            DiagnosticEvent::BucketFlushed { key, run_count } => {
                tracing::info!(key, run_count, "forward group bucket flushed")
            }
            DiagnosticEvent::ForwarderFailed { key, reason } => {
                tracing::warn!(key, reason, "forwarder export failed")
            }
        }
    }
}
