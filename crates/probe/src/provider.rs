//! Probe provider interface.

use crate::types::{AddressInfo, LatencySample, ScanResult, TraceResult};
use async_trait::async_trait;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single probe invocation
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("probe task failed: {0}")]
    Task(String),
}

impl From<ProbeError> for common::Error {
    fn from(e: ProbeError) -> Self {
        common::Error::probe(e)
    }
}

/// Performs measurements against a single address.
///
/// Implementations must honour `timeout` for each individual wait: a single
/// echo reply for latency, a single hop for traces, a single connection for
/// port scans. Callers additionally bound each whole call.
#[async_trait]
pub trait ProbeProvider: Send + Sync {
    /// Send `num_pings` echo requests carrying `payload_size` bytes
    async fn measure_latency(
        &self,
        address: IpAddr,
        num_pings: u32,
        payload_size: usize,
        timeout: Duration,
    ) -> Result<LatencySample, ProbeError>;

    /// Walk the route to `address`, at most `max_hops` hops
    async fn trace_route(
        &self,
        address: IpAddr,
        max_hops: u8,
        timeout: Duration,
    ) -> Result<TraceResult, ProbeError>;

    /// Time TCP connections to the well-known ports
    async fn scan_ports(&self, address: IpAddr, timeout: Duration)
    -> Result<ScanResult, ProbeError>;

    /// Resolve a configured host name; `None` if it cannot be resolved
    async fn resolve_address(&self, hostname: &str) -> Option<AddressInfo>;

    /// Get the name of this provider
    fn name(&self) -> &str;
}
