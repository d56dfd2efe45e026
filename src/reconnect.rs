//! Background reconnection loop

use crate::connection::ConnectionManager;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Share of the base period used as the upper jitter bound
const MAX_JITTER_FRACTION: f64 = 0.7;

/// Supervises the collector connection until stopped.
///
/// Waits for a disconnect signal, redials, and on failure sleeps for the
/// base period plus up to 70% random jitter so that many exporters
/// recovering at once do not hit the collector in lockstep.
pub struct Reconnector {
    manager: Arc<ConnectionManager>,
    period: Duration,
    stop: CancellationToken,
}

impl Reconnector {
    pub fn new(manager: Arc<ConnectionManager>, period: Duration, stop: CancellationToken) -> Self {
        Self {
            manager,
            period,
            stop,
        }
    }

    /// Run on the current runtime; the handle resolves once the loop has exited.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        debug!(
            "Background reconnector started for {} (period {:?})",
            self.manager.target(),
            self.period
        );

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = self.manager.disconnected() => {}
            }

            if self.manager.connect().await.is_ok() {
                continue;
            }

            let delay = self.period + jitter(self.period);
            debug!("Next reconnection attempt in {:?}", delay);
            tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = sleep(delay) => {}
            }
        }

        info!("Background reconnector stopped");
    }
}

/// Uniform random duration in `[0, 0.7 * period)`
pub fn jitter(period: Duration) -> Duration {
    let max_jitter_nanos = (period.as_nanos() as f64 * MAX_JITTER_FRACTION) as u64;
    if max_jitter_nanos == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(rand::rng().random_range(0..max_jitter_nanos))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::connection::{CollectorClient, Connector, DialOptions, Health, Metadata};
    use crate::errors::{ExportFailure, ExporterError, Result};
    use crate::telemetry::ResourceLogs;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::timeout;
    use tokio_test::assert_ok;

    struct NullClient;

    #[async_trait]
    impl CollectorClient for NullClient {
        async fn export(
            &self,
            _logs: &[ResourceLogs],
            _metadata: &Metadata,
        ) -> std::result::Result<(), ExportFailure> {
            Ok(())
        }

        async fn close(&self) {}
    }

    /// Fails the first `failures` dials, then succeeds
    struct FlakyConnector {
        failures: u32,
        dials: AtomicU32,
    }

    #[async_trait]
    impl Connector for FlakyConnector {
        async fn dial(&self, _options: &DialOptions) -> Result<Arc<dyn CollectorClient>> {
            let n = self.dials.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(ExporterError::Dial("connection refused".to_string()))
            } else {
                Ok(Arc::new(NullClient))
            }
        }
    }

    fn setup(failures: u32) -> (Arc<FlakyConnector>, Arc<ConnectionManager>) {
        let connector = Arc::new(FlakyConnector {
            failures,
            dials: AtomicU32::new(0),
        });
        let manager = Arc::new(ConnectionManager::new(
            connector.clone(),
            DialOptions::from_config(&Config::default()),
        ));
        (connector, manager)
    }

    #[test]
    fn test_jitter_bounds() {
        let period = Duration::from_millis(100);
        for _ in 0..1000 {
            assert!(jitter(period) < Duration::from_millis(70));
        }
        assert_eq!(jitter(Duration::ZERO), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_reconnects_after_disconnect() {
        let (connector, manager) = setup(2);
        let stop = CancellationToken::new();
        let handle =
            Reconnector::new(manager.clone(), Duration::from_millis(10), stop.clone()).spawn();

        manager.set_disconnected("lost");

        assert_ok!(
            timeout(Duration::from_secs(2), async {
                while !manager.health().is_connected() {
                    sleep(Duration::from_millis(5)).await;
                }
            })
            .await
        );
        assert_eq!(connector.dials.load(Ordering::SeqCst), 3);

        stop.cancel();
        assert_ok!(timeout(Duration::from_secs(1), handle).await);
    }

    #[tokio::test]
    async fn test_idle_while_connected() {
        let (connector, manager) = setup(0);
        manager.set_connected();
        let stop = CancellationToken::new();
        let handle =
            Reconnector::new(manager.clone(), Duration::from_millis(10), stop.clone()).spawn();

        sleep(Duration::from_millis(50)).await;
        assert_eq!(connector.dials.load(Ordering::SeqCst), 0);
        assert_eq!(*manager.health(), Health::Connected);

        stop.cancel();
        assert_ok!(timeout(Duration::from_secs(1), handle).await);
    }

    #[tokio::test]
    async fn test_stop_interrupts_backoff_sleep() {
        let (_connector, manager) = setup(u32::MAX);
        let stop = CancellationToken::new();
        let handle =
            Reconnector::new(manager.clone(), Duration::from_secs(60), stop.clone()).spawn();

        manager.set_disconnected("lost");
        sleep(Duration::from_millis(50)).await;
        stop.cancel();

        assert_ok!(timeout(Duration::from_millis(500), handle).await);
    }
}
