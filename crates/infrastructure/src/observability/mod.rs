//! 可观测性：指标与结构化日志

pub mod metrics_collector;
pub mod structured_logger;

pub use metrics_collector::{install_prometheus_recorder, MetricsCollector};
pub use structured_logger::{init_logging, LogFormat, StructuredLogger};
