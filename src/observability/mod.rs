//! Observability for the relay
//!
//! Structured logging, process-wide metrics and the health endpoints.

pub mod health;
pub mod logging;
pub mod metrics;

pub use health::{HealthReport, HealthSource, HealthStatus};
pub use logging::{init_default_logging, init_logging, mask_secret, LogFormat};
pub use metrics::{metrics, MetricsCollector, MetricsSnapshot};

// Span macros for structured logging
pub use logging::{client_span, device_span};
