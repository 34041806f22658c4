//! Network probes for connmonitor.
//!
//! This crate defines the measurements a collector can take against a host
//! and the [`ProbeProvider`] interface that performs them:
//! - Latency: a round of ICMP echo requests summarised as min/avg/max/std/loss
//! - Trace: ICMP echo with increasing TTL, one entry per hop
//! - Port scan: TCP connect timing on the http, https and mysql ports
//!
//! [`NetworkProvider`] implements the interface on top of raw sockets and
//! the system resolver. Raw ICMP sockets require CAP_NET_RAW; without it
//! latency and trace probes fail with a transport error.
//!
//! # Example
//!
//! ```no_run
//! use probe::{NetworkProvider, ProbeProvider};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = NetworkProvider::new();
//! let host = provider.resolve_address("example.com").await.ok_or("unresolvable")?;
//!
//! let sample = provider
//!     .measure_latency(host.address, 10, 43, Duration::from_secs(1))
//!     .await?;
//! println!("{sample}");
//! # Ok(())
//! # }
//! ```

pub mod icmp;
pub mod network;
pub mod provider;
pub mod types;

pub use network::NetworkProvider;
pub use provider::{ProbeError, ProbeProvider};
pub use types::{
    AddressInfo, Hop, LatencySample, ProbeResult, ProbeType, SCAN_PORTS, ScanResult, TraceResult,
};
