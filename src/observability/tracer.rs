//! Distributed tracing hooks used by the tracing handlers.

use std::time::Instant;

use thiserror::Error;
use tracing::trace;

use crate::core::Headers;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TracerError {
    #[error("failed to report span: {0}")]
    Report(String),
}

#[derive(Debug, Clone)]
pub struct Span {
    pub trace_id: String,
    pub span_id: String,
    pub operation: String,
    pub started: Instant,
}

/// Tracing SDK adapter. Entry spans read the propagated context from
/// incoming headers; exit spans inject it into outgoing headers.
pub trait TracingBackend: Send + Sync {
    fn create_entry_span(&self, operation: &str, carrier: &Headers) -> Result<Span, TracerError>;

    fn create_exit_span(
        &self,
        operation: &str,
        carrier: &mut Headers,
        peer: &str,
    ) -> Result<Span, TracerError>;

    fn end_span(&self, span: Span, status: u16) -> Result<(), TracerError>;
}

/// Backend that records nothing.
#[derive(Debug, Default)]
pub struct NoopTracer;

impl TracingBackend for NoopTracer {
    fn create_entry_span(&self, operation: &str, _carrier: &Headers) -> Result<Span, TracerError> {
        Ok(noop_span(operation))
    }

    fn create_exit_span(
        &self,
        operation: &str,
        _carrier: &mut Headers,
        _peer: &str,
    ) -> Result<Span, TracerError> {
        Ok(noop_span(operation))
    }

    fn end_span(&self, span: Span, status: u16) -> Result<(), TracerError> {
        trace!(operation = %span.operation, status, "Span ended");
        Ok(())
    }
}

fn noop_span(operation: &str) -> Span {
    Span {
        trace_id: String::new(),
        span_id: String::new(),
        operation: operation.to_string(),
        started: Instant::now(),
    }
}
