//! Host connectivity tracking feeding the delivery engine's reachability gate.

pub mod monitor;
pub mod probe;

pub use monitor::{NetworkId, NetworkMonitor, PROBE_NETWORK_ID, ReachabilitySignal, Transport};
pub use probe::TcpProbe;
