use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tracing::{debug, info};

/// Opaque handle the connectivity source uses to identify a network.
pub type NetworkId = u64;

/// Reserved id for reachability reported by [`super::TcpProbe`].
pub const PROBE_NETWORK_ID: NetworkId = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Wifi,
    Cellular,
    Ethernet,
    Vpn,
    Bluetooth,
    Other,
}

/// Last-known network availability. Written only by [`NetworkMonitor`],
/// read by the delivery engine before each tick.
#[derive(Debug, Clone)]
pub struct ReachabilitySignal(Arc<AtomicBool>);

impl ReachabilitySignal {
    pub fn new(initial: bool) -> Self {
        Self(Arc::new(AtomicBool::new(initial)))
    }

    pub fn is_reachable(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn set(&self, reachable: bool) -> bool {
        self.0.swap(reachable, Ordering::AcqRel)
    }
}

impl Default for ReachabilitySignal {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Turns connectivity callbacks into the reachability signal and the
/// out-of-band drain trigger.
///
/// Callbacks only touch a small set and an atomic, then poke a `Notify`, so they
/// are safe to call from any thread and never wait on delivery.
pub struct NetworkMonitor {
    interests: HashSet<Transport>,
    available: Mutex<HashSet<NetworkId>>,
    signal: ReachabilitySignal,
    drain_trigger: Arc<Notify>,
}

impl NetworkMonitor {
    pub const DEFAULT_INTERESTS: [Transport; 3] =
        [Transport::Wifi, Transport::Cellular, Transport::Ethernet];

    pub fn new(signal: ReachabilitySignal, drain_trigger: Arc<Notify>) -> Self {
        Self::with_interests(signal, drain_trigger, Self::DEFAULT_INTERESTS)
    }

    pub fn with_interests(
        signal: ReachabilitySignal,
        drain_trigger: Arc<Notify>,
        interests: impl IntoIterator<Item = Transport>,
    ) -> Self {
        Self {
            interests: interests.into_iter().collect(),
            available: Mutex::new(HashSet::new()),
            signal,
            drain_trigger,
        }
    }

    pub fn signal(&self) -> ReachabilitySignal {
        self.signal.clone()
    }

    pub fn is_reachable(&self) -> bool {
        self.signal.is_reachable()
    }

    pub fn interests(&self) -> &HashSet<Transport> {
        &self.interests
    }

    pub fn on_available(&self, network: NetworkId, transport: Transport) {
        if !self.interests.contains(&transport) {
            debug!(network, ?transport, "Ignoring network outside interest set");
            return;
        }
        self.mark_available(network);
    }

    pub fn on_lost(&self, network: NetworkId) {
        let remaining = {
            let mut available = self.available.lock();
            available.remove(&network);
            available.len()
        };

        if remaining == 0 {
            if self.signal.set(false) {
                info!(network, "Network lost, pausing delivery");
            }
        } else {
            debug!(network, remaining, "Network lost, others still available");
        }
    }

    /// Feed from a connectivity probe rather than an OS callback.
    pub fn on_probe_result(&self, reachable: bool) {
        if reachable {
            self.mark_available(PROBE_NETWORK_ID);
        } else {
            self.on_lost(PROBE_NETWORK_ID);
        }
    }

    pub fn available_networks(&self) -> usize {
        self.available.lock().len()
    }

    fn mark_available(&self, network: NetworkId) {
        self.available.lock().insert(network);
        let was_reachable = self.signal.set(true);
        if !was_reachable {
            info!(network, "Network available, resuming delivery");
        }
        // Drain now rather than at the next tick
        self.drain_trigger.notify_one();
    }
}
