//! Asynchronous Log Exporter Library
//!
//! This library batches log records from applications and delivers them to a
//! telemetry collector in the background, without ever blocking the producer.
//! A bounded intake queue feeds a fixed pool of export workers, and a
//! background reconnector restores the collector connection after failures.

pub mod config;
pub mod connection;
pub mod errors;
pub mod exporter;
pub mod metrics;
pub mod pool;
pub mod queue;
pub mod reconnect;
pub mod retry;
pub mod telemetry;
pub mod transport;
mod worker;

pub use config::{Config, TlsConfig};
pub use connection::{CollectorClient, Connector, DialOptions, Health, Metadata};
pub use errors::{ExportFailure, ExporterError, Result, SubmitError};
pub use exporter::{LifecycleState, LogExporter};
pub use metrics::{ExportMetricsSnapshot, MetricsSink, Outcome};
pub use retry::{RetryConfig, RetryDecision, RetryPolicy};
pub use telemetry::{Batch, LogLevel, LogRecord, Resource, ResourceLogs};
pub use transport::HttpConnector;
