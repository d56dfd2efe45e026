//! Export workers draining the intake queue

use crate::connection::{ConnectionManager, Metadata};
use crate::errors::{ExportFailure, ExporterError};
use crate::metrics::{ExportMetrics, Observer, Outcome};
use crate::pool::BatchPool;
use crate::retry::{self, RetryPolicy};
use crate::telemetry::Batch;
use flume::Receiver;
use futures::future::join_all;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tonic::Code;
use tracing::{debug, error, warn};

/// Shared state every worker needs for a delivery
pub(crate) struct ExportContext {
    pub(crate) connection: Arc<ConnectionManager>,
    pub(crate) pool: Arc<BatchPool>,
    pub(crate) observer: Arc<Observer>,
    pub(crate) retry: Arc<dyn RetryPolicy>,
    pub(crate) metadata: Metadata,
    pub(crate) stop: CancellationToken,
    pub(crate) export_timeout: Duration,
}

/// Fixed set of workers. Each worker has at most one attempt in flight,
/// so the worker count is the concurrency limit.
pub(crate) struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    active: Arc<AtomicUsize>,
}

impl WorkerPool {
    pub(crate) fn spawn(
        count: usize,
        receiver: Receiver<Batch>,
        context: Arc<ExportContext>,
        active: Arc<AtomicUsize>,
    ) -> Self {
        let handles = (0..count)
            .map(|worker_id| {
                active.fetch_add(1, Ordering::AcqRel);
                let receiver = receiver.clone();
                let context = Arc::clone(&context);
                let active = Arc::clone(&active);
                tokio::spawn(async move {
                    let _guard = ActiveGuard(active);
                    run_worker(worker_id, receiver, context).await;
                })
            })
            .collect();

        Self { handles, active }
    }

    pub(crate) fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Wait for every worker to exit
    pub(crate) async fn join(self) {
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                error!("Export worker task failed: {}", e);
            }
        }
    }
}

struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Keeps the in-flight gauge right even when an attempt is cancelled mid-call
struct AttemptGuard<'a>(&'a ExportMetrics);

impl<'a> AttemptGuard<'a> {
    fn begin(metrics: &'a ExportMetrics) -> Self {
        metrics.begin_attempt();
        Self(metrics)
    }
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        self.0.end_attempt();
    }
}

async fn run_worker(worker_id: usize, receiver: Receiver<Batch>, context: Arc<ExportContext>) {
    debug!("Export worker {} started", worker_id);

    while let Ok(batch) = receiver.recv_async().await {
        let records = batch.record_count() as u64;

        match export_batch(&context, &batch).await {
            Ok(()) => {
                debug!("Exported batch {} with {} records", batch.id, records);
                context.observer.observe(Outcome::Success, records);
            }
            Err(e) => {
                warn!("Failed to export batch {} with {} records: {}", batch.id, records, e);
                if let ExporterError::Export(failure) = &e
                    && failure.is_connection_failure()
                {
                    context.connection.set_disconnected(failure.to_string());
                }
                context.observer.observe(Outcome::Failed, records);
            }
        }

        context.pool.release(batch);
    }

    debug!("Export worker {} drained and exiting", worker_id);
}

/// One delivery of `batch`, retries included
async fn export_batch(context: &ExportContext, batch: &Batch) -> Result<(), ExporterError> {
    if batch.is_empty() {
        return Ok(());
    }

    if context.connection.health().is_disconnected() {
        return Err(ExporterError::Disconnected);
    }
    let Some(client) = context.connection.current() else {
        return Err(ExporterError::Disconnected);
    };

    let scope = context.stop.child_token();
    if scope.is_cancelled() {
        return Err(ExporterError::Stopped);
    }

    let client = &client;
    let logs = batch.logs.as_slice();
    let metadata = &context.metadata;
    let metrics = &context.observer.local;
    let export_timeout = context.export_timeout;

    // Each attempt gets its own deadline; the retry policy alone bounds the sequence
    let attempts = retry::execute(context.retry.as_ref(), &scope, move || async move {
        let _inflight = AttemptGuard::begin(metrics);
        match timeout(export_timeout, client.export(logs, metadata)).await {
            Ok(result) => result,
            Err(_) => Err(ExportFailure::new(
                Code::DeadlineExceeded,
                format!("export attempt did not complete within {:?}", export_timeout),
            )),
        }
    });

    tokio::select! {
        _ = scope.cancelled() => Err(ExporterError::Cancelled),
        result = attempts => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::connection::{CollectorClient, Connector, DialOptions};
    use crate::errors::Result;
    use crate::retry::RetryConfig;
    use crate::telemetry::{LogLevel, LogRecord, Resource, ResourceLogs};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU32;

    /// Replays scripted responses, succeeding once the script runs out
    struct ScriptedClient {
        script: Mutex<Vec<std::result::Result<(), ExportFailure>>>,
        calls: AtomicU32,
        delay: Duration,
        /// Calls that sleep for `delay`; zero means every call
        slow_calls: u32,
    }

    impl ScriptedClient {
        fn new(mut script: Vec<std::result::Result<(), ExportFailure>>) -> Self {
            script.reverse();
            Self {
                script: Mutex::new(script),
                calls: AtomicU32::new(0),
                delay: Duration::ZERO,
                slow_calls: 0,
            }
        }
    }

    #[async_trait]
    impl CollectorClient for ScriptedClient {
        async fn export(
            &self,
            _logs: &[ResourceLogs],
            _metadata: &Metadata,
        ) -> std::result::Result<(), ExportFailure> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() && (self.slow_calls == 0 || call < self.slow_calls) {
                tokio::time::sleep(self.delay).await;
            }
            self.script.lock().unwrap().pop().unwrap_or(Ok(()))
        }

        async fn close(&self) {}
    }

    struct NoDial;

    #[async_trait]
    impl Connector for NoDial {
        async fn dial(&self, _options: &DialOptions) -> Result<Arc<dyn CollectorClient>> {
            Err(ExporterError::Dial("not used".to_string()))
        }
    }

    async fn context(client: Arc<ScriptedClient>, retry: RetryConfig) -> ExportContext {
        let connection = Arc::new(ConnectionManager::new(
            Arc::new(NoDial),
            DialOptions::from_config(&Config::default()),
        ));
        connection.install(client).await.unwrap();
        connection.set_connected();

        ExportContext {
            connection,
            pool: Arc::new(BatchPool::new(4, 4)),
            observer: Arc::new(Observer::new(None)),
            retry: Arc::new(retry),
            metadata: Metadata::new(),
            stop: CancellationToken::new(),
            export_timeout: Duration::from_secs(5),
        }
    }

    fn batch(records: usize) -> Batch {
        let mut batch = Batch::with_capacity(1);
        batch.logs.push(ResourceLogs::new(
            Resource::new(),
            (0..records)
                .map(|i| LogRecord::new(LogLevel::Info, format!("record {}", i)))
                .collect(),
        ));
        batch
    }

    #[tokio::test]
    async fn test_success_makes_single_attempt() {
        let client = Arc::new(ScriptedClient::new(vec![]));
        let context = context(client.clone(), RetryConfig::disabled()).await;

        assert!(export_batch(&context, &batch(3)).await.is_ok());
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert_eq!(context.observer.local.snapshot().attempts, 1);
    }

    #[tokio::test]
    async fn test_empty_batch_skips_network() {
        let client = Arc::new(ScriptedClient::new(vec![]));
        let context = context(client.clone(), RetryConfig::disabled()).await;

        assert!(export_batch(&context, &Batch::with_capacity(1)).await.is_ok());
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);

        // A resource group without records is still delivered
        assert!(export_batch(&context, &batch(0)).await.is_ok());
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disconnected_fails_without_attempt() {
        let client = Arc::new(ScriptedClient::new(vec![]));
        let context = context(client.clone(), RetryConfig::disabled()).await;
        context.connection.set_disconnected("collector down");

        let result = export_batch(&context, &batch(1)).await;
        assert!(matches!(result, Err(ExporterError::Disconnected)));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_retry_wraps_attempts() {
        let unavailable = || Err(ExportFailure::new(Code::Unavailable, "down"));
        let client = Arc::new(ScriptedClient::new(vec![unavailable(), unavailable()]));
        let context = context(
            client.clone(),
            RetryConfig::unlimited(Duration::from_millis(1)),
        )
        .await;

        assert!(export_batch(&context, &batch(1)).await.is_ok());
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attempt_timeout_is_deadline_exceeded() {
        let mut client = ScriptedClient::new(vec![]);
        client.delay = Duration::from_secs(10);
        let client = Arc::new(client);
        let mut context = context(client.clone(), RetryConfig::disabled()).await;
        context.export_timeout = Duration::from_millis(20);

        let result = export_batch(&context, &batch(1)).await;
        assert!(matches!(
            result,
            Err(ExporterError::Export(ExportFailure { code: Code::DeadlineExceeded, .. }))
        ));
        assert_eq!(context.observer.local.snapshot().inflight, 0);
    }

    #[tokio::test]
    async fn test_retry_hint_may_exceed_attempt_timeout() {
        let throttled = Err(ExportFailure::new(Code::ResourceExhausted, "slow down")
            .with_retry_after(Duration::from_millis(150)));
        let client = Arc::new(ScriptedClient::new(vec![throttled]));
        let mut context = context(
            client.clone(),
            RetryConfig::unlimited(Duration::from_millis(1)),
        )
        .await;
        context.export_timeout = Duration::from_millis(50);

        assert!(export_batch(&context, &batch(1)).await.is_ok());
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timed_out_attempt_is_retried() {
        let mut client = ScriptedClient::new(vec![]);
        client.delay = Duration::from_millis(40);
        client.slow_calls = 1;
        let client = Arc::new(client);
        let mut context = context(
            client.clone(),
            RetryConfig::unlimited(Duration::from_millis(1)),
        )
        .await;
        context.export_timeout = Duration::from_millis(20);

        assert!(export_batch(&context, &batch(1)).await.is_ok());
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
        assert_eq!(context.observer.local.snapshot().inflight, 0);
    }

    #[tokio::test]
    async fn test_stop_cancels_inflight_attempt() {
        let mut client = ScriptedClient::new(vec![]);
        client.delay = Duration::from_secs(10);
        let client = Arc::new(client);
        let context = context(client.clone(), RetryConfig::disabled()).await;

        let stop = context.stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            stop.cancel();
        });

        let result = export_batch(&context, &batch(1)).await;
        assert!(matches!(result, Err(ExporterError::Cancelled)));
    }

    #[tokio::test]
    async fn test_worker_pool_drains_and_recycles() {
        let client = Arc::new(ScriptedClient::new(vec![Err(ExportFailure::new(
            Code::Unavailable,
            "down",
        ))]));
        let context = Arc::new(context(client.clone(), RetryConfig::disabled()).await);
        let (sender, receiver) = flume::bounded(8);
        for _ in 0..4 {
            sender.send(batch(2)).unwrap();
        }
        drop(sender);

        let active = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::spawn(2, receiver, Arc::clone(&context), active.clone());
        pool.join().await;

        assert_eq!(active.load(Ordering::SeqCst), 0);
        // Batches dequeued after the failure see the disconnected state
        let snapshot = context.observer.local.snapshot();
        assert!(snapshot.failed_batches >= 1);
        assert_eq!(snapshot.exported_batches + snapshot.failed_batches, 4);
        assert_eq!(snapshot.exported_records + snapshot.failed_records, 8);
        assert_eq!(context.pool.available(), 4);
        assert!(context.connection.health().is_disconnected());
    }
}
