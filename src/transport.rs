//! HTTP transport for delivering log batches to the collector

use crate::connection::{CollectorClient, Connector, DialOptions, Metadata};
use crate::errors::{ExportFailure, ExporterError, Result};
use crate::telemetry::{ExportLogsRequest, ResourceLogs};
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Certificate, Client, Response, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tonic::Code;
use tracing::{debug, warn};

pub const LOGS_PATH: &str = "/v1/logs";

/// Dials collectors speaking JSON over HTTP
#[derive(Debug, Clone, Default)]
pub struct HttpConnector;

impl HttpConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn dial(&self, options: &DialOptions) -> Result<Arc<dyn CollectorClient>> {
        let client = HttpCollectorClient::build(options)?;
        client.probe(options.timeout).await?;
        Ok(Arc::new(client))
    }
}

/// A dialed HTTP connection to the collector
#[derive(Debug)]
pub struct HttpCollectorClient {
    client: Client,
    target: String,
    endpoint: String,
    closed: AtomicBool,
}

impl HttpCollectorClient {
    /// Build the HTTP client. Plaintext unless TLS material is configured.
    pub fn build(options: &DialOptions) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(options.request_timeout)
            .connect_timeout(options.timeout)
            .user_agent(format!("otel_async_exporter/{}", env!("CARGO_PKG_VERSION")));

        let scheme = match &options.tls {
            Some(tls) => {
                if let Some(pem) = tls.load_ca_cert()? {
                    builder = builder.add_root_certificate(Certificate::from_pem(&pem)?);
                }
                builder = builder.https_only(true);
                "https"
            }
            None => "http",
        };

        Ok(Self {
            client: builder.build()?,
            target: options.target.clone(),
            endpoint: format!("{}://{}{}", scheme, options.target, LOGS_PATH),
            closed: AtomicBool::new(false),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Check the collector accepts TCP connections
    async fn probe(&self, dial_timeout: Duration) -> Result<()> {
        match timeout(dial_timeout, TcpStream::connect(&self.target)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(ExporterError::Dial(format!("{}: {}", self.target, e))),
            Err(_) => Err(ExporterError::Dial(format!(
                "{}: timed out after {:?}",
                self.target, dial_timeout
            ))),
        }
    }

    async fn handle_response(&self, response: Response) -> std::result::Result<(), ExportFailure> {
        let status = response.status();

        if status.is_success() {
            if let Ok(body) = response.json::<Value>().await {
                let rejected = body["partialSuccess"]["rejectedLogRecords"]
                    .as_u64()
                    .unwrap_or(0);
                if rejected > 0 {
                    warn!(
                        "Collector rejected {} log records: {}",
                        rejected,
                        body["partialSuccess"]["errorMessage"].as_str().unwrap_or("")
                    );
                }
            }
            return Ok(());
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        let error_body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        Err(ExportFailure {
            code: code_for_status(status),
            message: format!("collector responded {}: {}", status, error_body),
            retry_after,
        })
    }
}

#[async_trait]
impl CollectorClient for HttpCollectorClient {
    async fn export(
        &self,
        logs: &[ResourceLogs],
        metadata: &Metadata,
    ) -> std::result::Result<(), ExportFailure> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ExportFailure::new(Code::Cancelled, "connection is closing"));
        }

        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&ExportLogsRequest {
                resource_logs: logs,
            });
        for (key, value) in metadata {
            request = request.header(key.as_str(), value.as_str());
        }

        debug!("Sending {} resource logs to {}", logs.len(), self.endpoint);

        let response = request.send().await.map_err(failure_from_reqwest)?;
        self.handle_response(response).await
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Map an HTTP status to the status code used for retry classification
pub fn code_for_status(status: StatusCode) -> Code {
    match status.as_u16() {
        200..=299 => Code::Ok,
        400 => Code::InvalidArgument,
        401 => Code::Unauthenticated,
        403 => Code::PermissionDenied,
        404 => Code::NotFound,
        408 | 504 => Code::DeadlineExceeded,
        409 => Code::Aborted,
        413 => Code::OutOfRange,
        429 => Code::ResourceExhausted,
        499 => Code::Cancelled,
        501 => Code::Unimplemented,
        502 | 503 => Code::Unavailable,
        500..=599 => Code::Internal,
        _ => Code::Unknown,
    }
}

fn failure_from_reqwest(err: reqwest::Error) -> ExportFailure {
    let code = if err.is_timeout() {
        Code::DeadlineExceeded
    } else if err.is_connect() || err.is_request() {
        Code::Unavailable
    } else if err.is_builder() {
        Code::InvalidArgument
    } else {
        Code::Unknown
    };
    ExportFailure::new(code, err.to_string())
}
