//! Lifecycle of the asynchronous log exporter

use crate::config::Config;
use crate::connection::{ConnectionManager, Connector, DialOptions, Health};
use crate::errors::{ExporterError, Result, SubmitError};
use crate::metrics::{ExportMetricsSnapshot, MetricsSink, Observer, Outcome};
use crate::pool::BatchPool;
use crate::queue::IntakeQueue;
use crate::reconnect::Reconnector;
use crate::telemetry::ResourceLogs;
use crate::transport::HttpConnector;
use crate::worker::{ExportContext, WorkerPool};

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    NotStarted = 0,
    Running = 1,
    Stopped = 2,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => LifecycleState::NotStarted,
            1 => LifecycleState::Running,
            _ => LifecycleState::Stopped,
        }
    }
}

struct RunningTasks {
    workers: WorkerPool,
    reconnector: JoinHandle<()>,
}

/// Asynchronous batching exporter for log records.
///
/// Producers hand records to [`LogExporter::export_logs`], which never
/// blocks: the batch is either queued, dropped because the queue is full,
/// or rejected because the exporter is not running. A fixed pool of
/// workers delivers queued batches to the collector while a background
/// task keeps the connection alive.
///
/// All methods take `&self`; share the exporter behind an `Arc`.
pub struct LogExporter {
    config: Config,
    state: AtomicU8,
    connection: Arc<ConnectionManager>,
    pool: Arc<BatchPool>,
    observer: Arc<Observer>,
    queue: IntakeQueue,
    stop: CancellationToken,
    active_workers: Arc<AtomicUsize>,
    tasks: Mutex<Option<RunningTasks>>,
}

impl LogExporter {
    /// Create an unstarted exporter talking to the collector over HTTP
    pub fn new(config: Config) -> Result<Self> {
        Self::with_connector(config, Arc::new(HttpConnector::new()))
    }

    /// Create an unstarted exporter using a custom connector
    pub fn with_connector(config: Config, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate().map_err(ExporterError::Config)?;

        let connection = Arc::new(ConnectionManager::new(
            connector,
            DialOptions::from_config(&config),
        ));
        let queue = IntakeQueue::new(config.queue_capacity());
        let pool = Arc::new(BatchPool::new(
            config.max_export_batch_size,
            config.queue_capacity() + config.concurrency,
        ));

        Ok(Self {
            config,
            state: AtomicU8::new(LifecycleState::NotStarted as u8),
            connection,
            pool,
            observer: Arc::new(Observer::new(None)),
            queue,
            stop: CancellationToken::new(),
            active_workers: Arc::new(AtomicUsize::new(0)),
            tasks: Mutex::new(None),
        })
    }

    /// Create and start an HTTP exporter
    pub async fn start_new(config: Config) -> Result<Self> {
        let exporter = Self::new(config)?;
        exporter.start().await?;
        Ok(exporter)
    }

    /// Also report outcomes to `sink`. Must be called before `start`.
    pub fn with_metrics_sink(mut self, sink: Box<dyn MetricsSink>) -> Self {
        self.observer = Arc::new(Observer::new(Some(sink)));
        self
    }

    /// Connect and launch the background tasks.
    ///
    /// Only the first call does anything; every later call returns
    /// [`ExporterError::AlreadyStarted`]. A failed first connection does not
    /// fail startup, the background reconnector takes over.
    #[instrument(skip(self), fields(collector = %self.config.collector_addr))]
    pub async fn start(&self) -> Result<()> {
        // Taken before the state flips so a concurrent shutdown waits for the tasks
        let mut tasks = self.tasks.lock().await;

        if self
            .state
            .compare_exchange(
                LifecycleState::NotStarted as u8,
                LifecycleState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(ExporterError::AlreadyStarted);
        }

        info!(
            "Starting log exporter with {} workers, queue capacity {}",
            self.config.concurrency,
            self.queue.capacity()
        );

        if self.connection.connect().await.is_err() {
            info!("Initial connection failed, reconnecting in the background");
        }

        let reconnector = Reconnector::new(
            Arc::clone(&self.connection),
            self.config.effective_reconnection_period(),
            self.stop.clone(),
        )
        .spawn();

        let context = Arc::new(ExportContext {
            connection: Arc::clone(&self.connection),
            pool: Arc::clone(&self.pool),
            observer: Arc::clone(&self.observer),
            retry: self.config.resolved_retry_policy(),
            metadata: self.config.headers.clone(),
            stop: self.stop.clone(),
            export_timeout: self.config.export_timeout,
        });
        let workers = WorkerPool::spawn(
            self.config.concurrency,
            self.queue.receiver(),
            context,
            Arc::clone(&self.active_workers),
        );

        *tasks = Some(RunningTasks {
            workers,
            reconnector,
        });
        Ok(())
    }

    /// Queue records for asynchronous delivery without blocking.
    pub fn export_logs<I>(&self, logs: I) -> std::result::Result<(), SubmitError>
    where
        I: IntoIterator<Item = ResourceLogs>,
    {
        match self.state() {
            LifecycleState::NotStarted => return Err(SubmitError::NotStarted),
            LifecycleState::Stopped => return Err(SubmitError::Stopped),
            LifecycleState::Running => {}
        }

        let mut batch = self.pool.acquire();
        batch.logs.extend(logs);

        match self.queue.submit(batch) {
            Ok(()) => Ok(()),
            Err((reason, batch)) => {
                if reason == SubmitError::QueueFull {
                    let records = batch.record_count() as u64;
                    warn!("Intake queue full, dropping batch of {} records", records);
                    self.observer.observe(Outcome::Dropped, records);
                }
                self.pool.release(batch);
                Err(reason)
            }
        }
    }

    /// Drain queued batches, close the connection and stop background work.
    ///
    /// Returns [`ExporterError::DeadlineExceeded`] when the reconnector has not
    /// confirmed its exit within `deadline` of the call. Does nothing unless
    /// the exporter is running.
    #[instrument(skip(self))]
    pub async fn shutdown(&self, deadline: Duration) -> Result<()> {
        let deadline = Instant::now() + deadline;

        if self
            .state
            .compare_exchange(
                LifecycleState::Running as u8,
                LifecycleState::Stopped as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Ok(());
        }

        info!("Shutting down log exporter");
        self.queue.close();

        let Some(RunningTasks {
            workers,
            reconnector,
        }) = self.tasks.lock().await.take()
        else {
            return Ok(());
        };

        workers.join().await;
        self.connection.close().await;
        self.stop.cancel();

        match timeout_at(deadline, reconnector).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Background reconnector task failed: {}", e),
            Err(_) => {
                warn!("Shutdown deadline elapsed before the reconnector stopped");
                return Err(ExporterError::DeadlineExceeded);
            }
        }

        let metrics = self.metrics();
        info!(
            "Log exporter stopped - exported: {} records, failed: {} records, dropped: {} records",
            metrics.exported_records, metrics.failed_records, metrics.dropped_records
        );
        Ok(())
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn health(&self) -> Arc<Health> {
        self.connection.health()
    }

    pub fn metrics(&self) -> ExportMetricsSnapshot {
        self.observer.local.snapshot()
    }

    /// Workers that have not exited yet
    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::Acquire)
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Drop for LogExporter {
    fn drop(&mut self) {
        self.queue.close();
        self.stop.cancel();
    }
}
