//! gRPC trace-service ingress (§4.2, §6.3) and the sink seam that lets this
//! crate stay decoupled from the reconciliation engine (§9 "global
//! singletons → dependency injection").

use std::sync::Arc;

use async_trait::async_trait;
use opentelemetry_proto::tonic::collector::trace::v1::{
    trace_service_server::TraceService, ExportTraceServiceRequest, ExportTraceServiceResponse,
};
use tonic::{Request, Response, Status};

use th_domain::run::UpsertInput;

use crate::codec::iter_spans;
use crate::translate::span_to_run_create;

/// What the OTLP ingress hands translated runs to. Implemented by the
/// gateway binary over the reconciliation engine; kept as a trait here so
/// `th-otlp` never depends on `th-reconcile`.
#[async_trait]
pub trait OtlpIngestSink: Send + Sync {
    async fn ingest(&self, items: Vec<UpsertInput>);
}

pub struct TraceServiceImpl<S> {
    sink: Arc<S>,
}

impl<S> TraceServiceImpl<S> {
    pub fn new(sink: Arc<S>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl<S> TraceService for TraceServiceImpl<S>
where
    S: OtlpIngestSink + 'static,
{
    async fn export(
        &self,
        request: Request<ExportTraceServiceRequest>,
    ) -> Result<Response<ExportTraceServiceResponse>, Status> {
        let req = request.into_inner();
        let items: Vec<UpsertInput> = iter_spans(&req)
            .map(|(resource, span)| UpsertInput::Create(span_to_run_create(span, resource)))
            .collect();
        let count = items.len();
        self.sink.ingest(items).await;
        tracing::debug!(spans = count, "ingested spans via otlp/grpc");
        Ok(Response::new(ExportTraceServiceResponse {
            partial_success: None,
        }))
    }
}
