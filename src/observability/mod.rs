pub mod logging;
pub mod metrics;
pub mod tracer;

pub use logging::{LogGuard, LoggingConfig, init_logging};
pub use metrics::{Metrics, init_metrics};
pub use tracer::{NoopTracer, Span, TracerError, TracingBackend};
