//! Probe provider backed by the host's network stack.

use crate::icmp::{self, EchoRequest, IcmpSocket, ReplyKind};
use crate::provider::{ProbeError, ProbeProvider};
use crate::types::{AddressInfo, Hop, LatencySample, SCAN_PORTS, ScanResult, TraceResult};
use async_trait::async_trait;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Provider using raw ICMP sockets for latency and traces and TCP connects
/// for port scans.
#[derive(Debug, Default, Clone, Copy)]
pub struct NetworkProvider;

impl NetworkProvider {
    pub fn new() -> Self {
        Self
    }
}

async fn blocking<T, F>(f: F) -> Result<T, ProbeError>
where
    F: FnOnce() -> std::io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ProbeError::Task(e.to_string()))?
        .map_err(ProbeError::from)
}

/// Raised when the awaiting task goes away, so a blocking probe can stop
/// between round trips instead of running to completion.
#[derive(Debug, Default)]
struct CancelOnDrop(Arc<AtomicBool>);

impl CancelOnDrop {
    fn flag(&self) -> Arc<AtomicBool> {
        self.0.clone()
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

fn check_cancelled(cancelled: &AtomicBool) -> io::Result<()> {
    if cancelled.load(Ordering::Relaxed) {
        return Err(io::Error::new(io::ErrorKind::Interrupted, "probe cancelled"));
    }
    Ok(())
}

fn ping_blocking(
    address: IpAddr,
    num_pings: u32,
    payload_size: usize,
    wait: Duration,
) -> std::io::Result<LatencySample> {
    let socket = IcmpSocket::open(address)?;
    let ident = icmp::next_ident();
    let payload = icmp::payload(payload_size);

    let mut sent_at = Vec::with_capacity(num_pings as usize);
    for sequence in 0..num_pings {
        let request = EchoRequest::new(ident, sequence as u16, payload.clone());
        sent_at.push(socket.send(&request, address)?);
    }

    let deadline = Instant::now() + wait;
    let mut answered = vec![false; sent_at.len()];
    let mut rtts = Vec::with_capacity(sent_at.len());

    while rtts.len() < sent_at.len() {
        let Some((reply, from, received_at)) = socket.recv_until(ident, deadline)? else {
            break;
        };
        let index = reply.sequence as usize;
        if reply.kind != ReplyKind::EchoReply || from != address || index >= answered.len() {
            continue;
        }
        if !answered[index] {
            answered[index] = true;
            rtts.push(received_at.saturating_duration_since(sent_at[index]));
        }
    }

    Ok(LatencySample::from_rtts(&rtts, num_pings))
}

fn trace_blocking(
    address: IpAddr,
    max_hops: u8,
    wait: Duration,
    cancelled: &AtomicBool,
) -> io::Result<TraceResult> {
    let socket = IcmpSocket::open(address)?;
    let ident = icmp::next_ident();
    let payload = icmp::payload(0);
    let mut hops = Vec::with_capacity(max_hops as usize);

    for ttl in 1..=max_hops {
        check_cancelled(cancelled)?;
        socket.set_ttl(ttl as u32)?;
        let request = EchoRequest::new(ident, ttl as u16, payload.clone());
        let sent = socket.send(&request, address)?;
        let deadline = sent + wait;

        let mut hop = None;
        let mut reached = false;
        while let Some((reply, from, received_at)) = socket.recv_until(ident, deadline)? {
            if reply.sequence != ttl as u16 {
                continue;
            }
            hop = Some(Hop {
                address: from,
                rtt: received_at.saturating_duration_since(sent),
            });
            reached = reply.kind != ReplyKind::TimeExceeded || from == address;
            break;
        }

        hops.push(hop);
        if reached {
            break;
        }
    }

    Ok(TraceResult::new(hops))
}

async fn time_connect(target: SocketAddr, wait: Duration) -> Option<Duration> {
    let start = Instant::now();
    match timeout(wait, TcpStream::connect(target)).await {
        Ok(Ok(_stream)) => Some(start.elapsed()),
        Ok(Err(e)) => {
            debug!(target = %target, error = %e, "Port closed");
            None
        }
        Err(_) => {
            debug!(target = %target, "Port connect timed out");
            None
        }
    }
}

#[async_trait]
impl ProbeProvider for NetworkProvider {
    async fn measure_latency(
        &self,
        address: IpAddr,
        num_pings: u32,
        payload_size: usize,
        timeout: Duration,
    ) -> Result<LatencySample, ProbeError> {
        let sample =
            blocking(move || ping_blocking(address, num_pings, payload_size, timeout)).await?;
        debug!(address = %address, avg_ms = sample.avg_ms, loss = sample.loss, "Latency measured");
        Ok(sample)
    }

    async fn trace_route(
        &self,
        address: IpAddr,
        max_hops: u8,
        timeout: Duration,
    ) -> Result<TraceResult, ProbeError> {
        let guard = CancelOnDrop::default();
        let cancelled = guard.flag();
        let trace =
            blocking(move || trace_blocking(address, max_hops, timeout, &cancelled)).await?;
        drop(guard);
        debug!(address = %address, hops = trace.hops.len(), "Route traced");
        Ok(trace)
    }

    async fn scan_ports(
        &self,
        address: IpAddr,
        timeout: Duration,
    ) -> Result<ScanResult, ProbeError> {
        let [http, https, mysql] = SCAN_PORTS.map(|(port, _)| SocketAddr::new(address, port));
        let (http, https, mysql) = tokio::join!(
            time_connect(http, timeout),
            time_connect(https, timeout),
            time_connect(mysql, timeout),
        );
        Ok(ScanResult { http, https, mysql })
    }

    async fn resolve_address(&self, hostname: &str) -> Option<AddressInfo> {
        if let Ok(ip) = hostname.parse::<IpAddr>() {
            return Some(AddressInfo::new(ip));
        }

        match tokio::net::lookup_host((hostname, 0)).await {
            Ok(mut addrs) => addrs.next().map(|addr| AddressInfo::new(addr.ip())),
            Err(e) => {
                warn!(host = hostname, error = %e, "DNS lookup failed");
                None
            }
        }
    }

    fn name(&self) -> &str {
        "network"
    }
}
