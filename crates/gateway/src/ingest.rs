//! Wires the OTLP translator's ingest seam to the reconciliation engine
//! without either crate depending on the other (§9 "dependency injection").

use std::sync::Arc;

use async_trait::async_trait;

use th_domain::run::UpsertInput;
use th_otlp::OtlpIngestSink;
use th_reconcile::ReconcileEngine;

pub struct EngineIngestSink {
    engine: Arc<ReconcileEngine>,
}

impl EngineIngestSink {
    pub fn new(engine: Arc<ReconcileEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl OtlpIngestSink for EngineIngestSink {
    async fn ingest(&self, items: Vec<UpsertInput>) {
        match self.engine.upsert_batch(items).await {
            Ok(outcome) => {
                if !outcome.errors.is_empty() {
                    tracing::warn!(errors = ?outcome.errors, "otlp batch had per-span errors");
                }
            }
            Err(e) => tracing::error!(error = %e, "otlp batch upsert failed"),
        }
    }
}
