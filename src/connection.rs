//! Ownership of the single live collector connection
//!
//! The [`ConnectionManager`] is the only component that touches the current
//! handle. Workers read the health snapshot on every batch, so health lives
//! in an [`ArcSwap`] and is never behind a lock. The handle itself sits
//! behind a short-lived `RwLock` that is only written when a new connection
//! supersedes the old one.

use crate::config::{Config, TlsConfig};
use crate::errors::{ExportFailure, ExporterError, Result};
use crate::telemetry::ResourceLogs;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Key/value headers attached to every export call
pub type Metadata = BTreeMap<String, String>;

/// A live connection to the collector.
#[async_trait]
pub trait CollectorClient: Send + Sync {
    /// Deliver one batch. Exactly one network call per invocation.
    async fn export(
        &self,
        logs: &[ResourceLogs],
        metadata: &Metadata,
    ) -> std::result::Result<(), ExportFailure>;

    /// Release the underlying transport
    async fn close(&self);
}

/// Establishes collector connections. Never retries on its own.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn dial(&self, options: &DialOptions) -> Result<Arc<dyn CollectorClient>>;
}

/// Everything a connector needs to reach the collector
#[derive(Debug, Clone)]
pub struct DialOptions {
    pub target: String,
    pub tls: Option<TlsConfig>,
    pub timeout: Duration,
    /// Per-call timeout the connection should apply to exports
    pub request_timeout: Duration,
}

impl DialOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            target: config.collector_addr.clone(),
            tls: config.tls.clone(),
            timeout: config.dial_timeout,
            request_timeout: config.export_timeout,
        }
    }
}

/// The exporter's belief about whether the connection is usable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Health {
    NotAttempted,
    Connected,
    Disconnected { last_error: String },
}

impl Health {
    pub fn is_connected(&self) -> bool {
        matches!(self, Health::Connected)
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, Health::Disconnected { .. })
    }
}

pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    options: DialOptions,
    current: RwLock<Option<Arc<dyn CollectorClient>>>,
    health: ArcSwap<Health>,
    /// Single pending permit, re-armed on every disconnect
    disconnected: Notify,
    closed: AtomicBool,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, options: DialOptions) -> Self {
        Self {
            connector,
            options,
            current: RwLock::new(None),
            health: ArcSwap::from_pointee(Health::NotAttempted),
            disconnected: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn target(&self) -> &str {
        &self.options.target
    }

    /// Establish a new connection without installing it
    pub async fn dial(&self) -> Result<Arc<dyn CollectorClient>> {
        self.connector.dial(&self.options).await
    }

    /// Make `handle` the current connection, closing the one it supersedes.
    pub async fn install(&self, handle: Arc<dyn CollectorClient>) -> Result<()> {
        let swapped = {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);

            if self.closed.load(Ordering::Acquire) {
                Err(handle)
            } else if current
                .as_ref()
                .is_some_and(|existing| Arc::ptr_eq(existing, &handle))
            {
                Ok(None)
            } else {
                Ok(current.replace(handle))
            }
        };

        match swapped {
            Err(refused) => {
                refused.close().await;
                Err(ExporterError::Stopped)
            }
            Ok(superseded) => {
                if let Some(old) = superseded {
                    debug!("Closing superseded collector connection");
                    old.close().await;
                }
                Ok(())
            }
        }
    }

    /// Dial and install, recording the resulting health
    pub async fn connect(&self) -> Result<()> {
        let result = match self.dial().await {
            Ok(handle) => self.install(handle).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(()) => {
                info!("Connected to collector at {}", self.options.target);
                self.set_connected();
            }
            Err(e) => {
                warn!("Failed to connect to collector at {}: {}", self.options.target, e);
                self.set_disconnected(e.to_string());
            }
        }

        result
    }

    /// Current connection, if any
    pub fn current(&self) -> Option<Arc<dyn CollectorClient>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn health(&self) -> Arc<Health> {
        self.health.load_full()
    }

    pub fn set_connected(&self) {
        self.health.store(Arc::new(Health::Connected));
    }

    /// Record a lost connection and wake the background reconnector
    pub fn set_disconnected(&self, last_error: impl Into<String>) {
        self.health.store(Arc::new(Health::Disconnected {
            last_error: last_error.into(),
        }));
        self.disconnected.notify_one();
    }

    /// Resolve once a disconnect has been signalled since the last wait
    pub async fn disconnected(&self) {
        self.disconnected.notified().await;
    }

    /// Close the current connection for good; later installs are refused
    pub async fn close(&self) {
        let current = {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            self.closed.store(true, Ordering::Release);
            current.take()
        };

        if let Some(handle) = current {
            handle.close().await;
        }
    }
}
