//! Configuration management for the log exporter

use crate::retry::{RetryConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_COLLECTOR_HOST: &str = "localhost";
pub const DEFAULT_COLLECTOR_PORT: u16 = 4318;
pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_QUEUE_MULTIPLIER: usize = 2;
pub const MAX_EXPORT_BATCH_SIZE: usize = 512;
pub const DEFAULT_RECONNECTION_PERIOD: Duration = Duration::from_secs(10);

/// Transport security material. Absent means plaintext.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TlsConfig {
    /// PEM encoded root certificate to trust in addition to the system roots
    pub ca_cert_path: Option<PathBuf>,
}

impl TlsConfig {
    pub fn with_ca_cert(path: impl Into<PathBuf>) -> Self {
        Self {
            ca_cert_path: Some(path.into()),
        }
    }

    /// Read the configured root certificate, if any
    pub fn load_ca_cert(&self) -> std::io::Result<Option<Vec<u8>>> {
        self.ca_cert_path.as_ref().map(std::fs::read).transpose()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// `host:port` of the collector
    pub collector_addr: String,

    /// Number of export workers, and therefore the in-flight attempt limit
    pub concurrency: usize,

    /// Intake queue capacity is `queue_multiplier * concurrency`
    pub queue_multiplier: usize,

    /// Pre-sized capacity of pooled batch buffers
    pub max_export_batch_size: usize,

    /// Base period between reconnection attempts
    pub reconnection_period: Duration,

    /// Upper bound for a single export attempt
    pub export_timeout: Duration,

    /// Timeout for establishing the collector connection
    pub dial_timeout: Duration,

    /// Metadata attached to every export call
    pub headers: BTreeMap<String, String>,

    pub tls: Option<TlsConfig>,

    pub retry: RetryConfig,

    /// Custom policy overriding `retry`
    #[serde(skip)]
    pub retry_policy: Option<Arc<dyn RetryPolicy>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            collector_addr: format!("{}:{}", DEFAULT_COLLECTOR_HOST, DEFAULT_COLLECTOR_PORT),
            concurrency: DEFAULT_CONCURRENCY,
            queue_multiplier: DEFAULT_QUEUE_MULTIPLIER,
            max_export_batch_size: MAX_EXPORT_BATCH_SIZE,
            reconnection_period: DEFAULT_RECONNECTION_PERIOD,
            export_timeout: Duration::from_secs(10),
            dial_timeout: Duration::from_secs(5),
            headers: BTreeMap::new(),
            tls: None,
            retry: RetryConfig::disabled(),
            retry_policy: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Ok(addr) = env::var("COLLECTOR_ADDR") {
            config.collector_addr = addr;
        }

        if let Ok(concurrency) = env::var("EXPORTER_CONCURRENCY") {
            if let Ok(value) = concurrency.parse() {
                config.concurrency = value;
            }
        }

        if let Ok(multiplier) = env::var("EXPORTER_QUEUE_MULTIPLIER") {
            if let Ok(value) = multiplier.parse() {
                config.queue_multiplier = value;
            }
        }

        if let Ok(batch_size) = env::var("EXPORTER_MAX_BATCH_SIZE") {
            if let Ok(value) = batch_size.parse() {
                config.max_export_batch_size = value;
            }
        }

        if let Ok(period) = env::var("RECONNECTION_PERIOD_MS") {
            if let Ok(ms) = period.parse::<u64>() {
                config.reconnection_period = Duration::from_millis(ms);
            }
        }

        if let Ok(timeout) = env::var("EXPORT_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse::<u64>() {
                config.export_timeout = Duration::from_millis(ms);
            }
        }

        if let Ok(timeout) = env::var("DIAL_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse::<u64>() {
                config.dial_timeout = Duration::from_millis(ms);
            }
        }

        if let Ok(headers) = env::var("EXPORTER_HEADERS") {
            config.headers = parse_headers(&headers);
        }

        if let Ok(ca_cert) = env::var("EXPORTER_CA_CERT") {
            config.tls = Some(TlsConfig::with_ca_cert(ca_cert));
        }

        if let Ok(enabled) = env::var("EXPORTER_RETRY_ENABLED") {
            config.retry.enabled = enabled.to_lowercase() == "true";
        }

        if let Ok(max_retries) = env::var("EXPORTER_RETRY_MAX_RETRIES") {
            if let Ok(value) = max_retries.parse() {
                config.retry.max_retries = Some(value);
            }
        }

        config
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.collector_addr.trim().is_empty() {
            return Err("collector_addr cannot be empty".to_string());
        }

        if self.concurrency == 0 {
            return Err("concurrency must be greater than 0".to_string());
        }

        if self.queue_multiplier == 0 {
            return Err("queue_multiplier must be greater than 0".to_string());
        }

        if self.max_export_batch_size == 0 {
            return Err("max_export_batch_size must be greater than 0".to_string());
        }

        Ok(())
    }

    pub fn with_address(mut self, addr: impl Into<String>) -> Self {
        self.collector_addr = addr.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_queue_multiplier(mut self, multiplier: usize) -> Self {
        self.queue_multiplier = multiplier;
        self
    }

    pub fn with_reconnection_period(mut self, period: Duration) -> Self {
        self.reconnection_period = period;
        self
    }

    pub fn with_export_timeout(mut self, timeout: Duration) -> Self {
        self.export_timeout = timeout;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Drop any TLS material, connecting in plaintext
    pub fn with_insecure(mut self) -> Self {
        self.tls = None;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_multiplier * self.concurrency
    }

    /// Reconnection period with the default substituted for zero
    pub fn effective_reconnection_period(&self) -> Duration {
        if self.reconnection_period.is_zero() {
            DEFAULT_RECONNECTION_PERIOD
        } else {
            self.reconnection_period
        }
    }

    /// The retry policy workers should use
    pub fn resolved_retry_policy(&self) -> Arc<dyn RetryPolicy> {
        match &self.retry_policy {
            Some(policy) => Arc::clone(policy),
            None => Arc::new(self.retry.clone()),
        }
    }
}

fn parse_headers(raw: &str) -> BTreeMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.trim().to_string()))
        })
        .collect()
}
