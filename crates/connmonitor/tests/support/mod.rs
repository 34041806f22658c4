//! Shared helpers for connmonitor integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use connmonitor::HostConfig;
use probe::{
    AddressInfo, Hop, LatencySample, ProbeError, ProbeProvider, ScanResult, TraceResult,
};
use std::collections::{HashSet, VecDeque};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Address returned for any resolvable name that is not an IP literal
pub const RESOLVED: &str = "192.0.2.1";

/// Provider returning canned results
#[derive(Default)]
pub struct ScriptedProvider {
    traces: Mutex<VecDeque<TraceResult>>,
    unresolvable: HashSet<String>,
    hang_scan: bool,
    hang_resolve: bool,
    fail_latency: bool,
    pub latency_calls: AtomicUsize,
    pub trace_calls: AtomicUsize,
    pub scan_calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Traces handed out in order; the last one repeats
    pub fn with_traces(mut self, traces: Vec<TraceResult>) -> Self {
        self.traces = Mutex::new(traces.into());
        self
    }

    pub fn with_unresolvable(mut self, name: &str) -> Self {
        self.unresolvable.insert(name.to_string());
        self
    }

    /// Port scans never complete
    pub fn hanging_scan(mut self) -> Self {
        self.hang_scan = true;
        self
    }

    /// Name lookups never complete, like a stalled resolver
    pub fn hanging_resolve(mut self) -> Self {
        self.hang_resolve = true;
        self
    }

    pub fn failing_latency(mut self) -> Self {
        self.fail_latency = true;
        self
    }
}

#[async_trait]
impl ProbeProvider for ScriptedProvider {
    async fn measure_latency(
        &self,
        _address: IpAddr,
        num_pings: u32,
        _payload_size: usize,
        _timeout: Duration,
    ) -> Result<LatencySample, ProbeError> {
        self.latency_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_latency {
            return Err(ProbeError::Transport(std::io::Error::other("no route")));
        }
        Ok(LatencySample::from_rtts(&[Duration::from_millis(5)], num_pings.min(1)))
    }

    async fn trace_route(
        &self,
        _address: IpAddr,
        _max_hops: u8,
        _timeout: Duration,
    ) -> Result<TraceResult, ProbeError> {
        self.trace_calls.fetch_add(1, Ordering::SeqCst);
        let mut traces = self.traces.lock().unwrap();
        let trace = if traces.len() > 1 {
            traces.pop_front()
        } else {
            traces.front().cloned()
        };
        Ok(trace.unwrap_or_default())
    }

    async fn scan_ports(&self, _address: IpAddr, _timeout: Duration) -> Result<ScanResult, ProbeError> {
        self.scan_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang_scan {
            std::future::pending::<()>().await;
        }
        Ok(ScanResult {
            http: Some(Duration::from_millis(1)),
            ..ScanResult::default()
        })
    }

    async fn resolve_address(&self, hostname: &str) -> Option<AddressInfo> {
        if self.hang_resolve {
            std::future::pending::<()>().await;
        }
        if self.unresolvable.contains(hostname) {
            return None;
        }
        let address = hostname
            .parse()
            .unwrap_or_else(|_| RESOLVED.parse().unwrap());
        Some(AddressInfo::new(address))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Trace through the given hop addresses
pub fn trace(route: &[&str]) -> TraceResult {
    TraceResult::new(
        route
            .iter()
            .map(|addr| {
                Some(Hop {
                    address: addr.parse().unwrap(),
                    rtt: Duration::from_millis(1),
                })
            })
            .collect(),
    )
}

/// Parse a single host line with a literal address
pub fn host(line: &str) -> HostConfig {
    let (name, options) = connmonitor::hosts::parse_line(line).unwrap().unwrap();
    HostConfig::new(1, name, name.parse().unwrap(), options)
}

/// Write `contents` to a fresh file under the temp dir
pub fn temp_hosts_file(tag: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "connmonitor-{}-{}-{}.conf",
        tag,
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::SeqCst)
    ));
    std::fs::write(&path, contents).unwrap();
    path
}

static COUNTER: AtomicUsize = AtomicUsize::new(0);
