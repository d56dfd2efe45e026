//! Log record data structures exported to the collector

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Resource attribute key carrying the tenant a batch belongs to
pub const TENANT_ID_KEY: &str = "tps.tenant.id";

/// Resource attribute key carrying the service name
pub const SERVICE_NAME_KEY: &str = "service.name";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub time: DateTime<Utc>,
    pub severity: LogLevel,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "TRACE"),
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
            LogLevel::Fatal => write!(f, "FATAL"),
        }
    }
}

impl From<&str> for LogLevel {
    fn from(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "TRACE" | "VERBOSE" => LogLevel::Trace,
            "DEBUG" => LogLevel::Debug,
            "INFO" | "INFORMATION" => LogLevel::Info,
            "WARN" | "WARNING" => LogLevel::Warn,
            "ERROR" | "ERR" => LogLevel::Error,
            "FATAL" | "CRITICAL" => LogLevel::Fatal,
            _ => LogLevel::Info,
        }
    }
}

impl LogRecord {
    pub fn new(severity: LogLevel, body: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            severity,
            body: body.into(),
            trace_id: None,
            span_id: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_trace_context(mut self, trace_id: String, span_id: String) -> Self {
        self.trace_id = Some(trace_id);
        self.span_id = Some(span_id);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Originating resource (service, tenant) of a group of records
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Resource {
    pub attributes: BTreeMap<String, String>,
}

impl Resource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_tenant(self, tenant_id: impl Into<String>) -> Self {
        self.with_attribute(TENANT_ID_KEY, tenant_id)
    }

    pub fn tenant(&self) -> Option<&str> {
        self.attributes.get(TENANT_ID_KEY).map(String::as_str)
    }
}

/// Records sharing one resource context
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLogs {
    pub resource: Resource,
    pub log_records: Vec<LogRecord>,
}

impl ResourceLogs {
    pub fn new(resource: Resource, log_records: Vec<LogRecord>) -> Self {
        Self {
            resource,
            log_records,
        }
    }
}

/// Wire body of one export call
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportLogsRequest<'a> {
    pub resource_logs: &'a [ResourceLogs],
}

/// A bundle of records delivered in one network call.
///
/// Owned by a single worker between dequeue and send, then recycled through
/// [`crate::pool::BatchPool`].
#[derive(Debug)]
pub struct Batch {
    pub id: Uuid,
    pub logs: Vec<ResourceLogs>,
}

impl Batch {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            logs: Vec::with_capacity(capacity),
        }
    }

    /// No resource groups at all. Groups without records still go out.
    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }

    /// Number of individual log records across all resources
    pub fn record_count(&self) -> usize {
        self.logs.iter().map(|rl| rl.log_records.len()).sum()
    }
}
