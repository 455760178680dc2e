use super::monitor::NetworkMonitor;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Connectivity source for hosts without an OS callback API: periodically
/// opens a TCP connection to the broker and reports transitions.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    target: String,
    interval: Duration,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(host: &str, port: u16, interval: Duration) -> Self {
        Self {
            target: format!("{host}:{port}"),
            interval,
            timeout: interval.min(Duration::from_secs(5)),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub async fn check(&self) -> bool {
        matches!(
            tokio::time::timeout(self.timeout, TcpStream::connect(&self.target)).await,
            Ok(Ok(_))
        )
    }

    pub fn spawn(self, monitor: Arc<NetworkMonitor>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last: Option<bool> = None;

            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let reachable = self.check().await;
                        if last != Some(reachable) {
                            debug!(endpoint = %self.target, reachable, "Probe result changed");
                            monitor.on_probe_result(reachable);
                            last = Some(reachable);
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ReachabilitySignal;
    use tokio::net::TcpListener;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_check_against_live_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let probe = TcpProbe::new("127.0.0.1", port, Duration::from_millis(50));
        assert!(probe.check().await);

        drop(listener);
        assert!(!probe.check().await);
    }

    #[tokio::test]
    async fn test_spawned_probe_reports_loss() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let monitor = Arc::new(NetworkMonitor::new(
            ReachabilitySignal::default(),
            Arc::new(Notify::new()),
        ));
        let cancel = CancellationToken::new();
        let handle = TcpProbe::new("127.0.0.1", port, Duration::from_millis(20))
            .spawn(monitor.clone(), cancel.clone());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!monitor.is_reachable());

        cancel.cancel();
        handle.await.unwrap();
    }
}
