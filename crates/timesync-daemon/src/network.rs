use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use timesync_core::config::NetworkConfig;
use timesync_scheduler::{host::NetworkMonitor, SyncEvent};
use tokio::{runtime::Handle, sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

/// Reachability by TCP probe: the network counts as reachable when
/// `probe_addr` accepts a connection within the timeout.
pub struct TcpProbeMonitor {
    runtime: Handle,
    events: mpsc::Sender<SyncEvent>,
    probe_addr: String,
    timeout: Duration,
    interval: Duration,
    watch: Option<JoinHandle<()>>,
}

impl TcpProbeMonitor {
    pub fn new(runtime: Handle, events: mpsc::Sender<SyncEvent>, config: &NetworkConfig) -> Self {
        Self {
            runtime,
            events,
            probe_addr: config.probe_addr.clone(),
            timeout: Duration::from_millis(config.probe_timeout_ms),
            interval: Duration::from_secs(config.watch_interval_secs.max(1)),
            watch: None,
        }
    }
}

fn resolve(addr: &str) -> Option<SocketAddr> {
    match addr.to_socket_addrs() {
        Ok(mut addrs) => addrs.next(),
        Err(e) => {
            debug!(addr, "probe address did not resolve: {e}");
            None
        }
    }
}

/// Blocking probe used for the snapshot check on the event worker.
pub fn probe(addr: &str, timeout: Duration) -> bool {
    resolve(addr).is_some_and(|sock| TcpStream::connect_timeout(&sock, timeout).is_ok())
}

async fn probe_async(addr: &str, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, tokio::net::TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

impl NetworkMonitor for TcpProbeMonitor {
    fn is_reachable(&self) -> bool {
        let reachable = probe(&self.probe_addr, self.timeout);
        debug!(addr = %self.probe_addr, reachable, "network snapshot");
        reachable
    }

    fn enable_watch(&mut self) {
        if self.watch.as_ref().is_some_and(|w| !w.is_finished()) {
            return;
        }
        let tx = self.events.clone();
        let addr = self.probe_addr.clone();
        let (timeout, interval) = (self.timeout, self.interval);

        info!(addr = %addr, every_secs = interval.as_secs(), "watching for network");
        self.watch = Some(self.runtime.spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if probe_async(&addr, timeout).await {
                    info!(addr = %addr, "network reachable again");
                    if tx.send(SyncEvent::NetworkRestored).await.is_err() {
                        warn!("event queue closed; network restore dropped");
                    }
                    break;
                }
            }
        }));
    }

    fn disable_watch(&mut self) {
        if let Some(watch) = self.watch.take() {
            watch.abort();
            debug!("network watch disabled");
        }
    }
}
