//! Probe result types and structures.

use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

/// Ports timed by a port scan, in output order.
pub const SCAN_PORTS: [(u16, &str); 3] = [(80, "http"), (443, "https"), (3306, "mysql")];

/// Kind of measurement performed against a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProbeType {
    /// ICMP echo round-trip statistics
    Latency,
    /// Hop-by-hop route trace
    Trace,
    /// TCP connect timing on well-known ports
    PortScan,
}

impl ProbeType {
    /// Every probe type, in the fixed order used for rendering.
    pub const ALL: [ProbeType; 3] = [ProbeType::Latency, ProbeType::Trace, ProbeType::PortScan];

    /// Field name used in structured output
    pub fn field_name(&self) -> &'static str {
        match self {
            ProbeType::Latency => "ping",
            ProbeType::Trace => "trace",
            ProbeType::PortScan => "scan",
        }
    }
}

impl fmt::Display for ProbeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field_name())
    }
}

fn millis(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1_000_000.0
}

/// Summary of one round of echo requests.
///
/// Times are in milliseconds; `loss` is a percentage. When every request was
/// lost the timing fields are `-1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencySample {
    #[serde(rename = "min")]
    pub min_ms: f64,
    #[serde(rename = "avg")]
    pub avg_ms: f64,
    #[serde(rename = "max")]
    pub max_ms: f64,
    #[serde(rename = "std")]
    pub std_ms: f64,
    pub loss: f64,
}

impl LatencySample {
    /// Summarise the round-trip times of the replies to `sent` requests.
    pub fn from_rtts(rtts: &[Duration], sent: u32) -> Self {
        let sent = sent.max(1) as f64;
        let received = rtts.len() as f64;
        let loss = ((sent - received).max(0.0) / sent) * 100.0;

        if rtts.is_empty() {
            return Self::unreachable(loss);
        }

        let samples: Vec<f64> = rtts.iter().copied().map(millis).collect();
        let min_ms = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max_ms = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let avg_ms = samples.iter().sum::<f64>() / received;
        let variance = samples.iter().map(|s| (s - avg_ms).powi(2)).sum::<f64>() / received;

        Self {
            min_ms,
            avg_ms,
            max_ms,
            std_ms: variance.sqrt(),
            loss,
        }
    }

    fn unreachable(loss: f64) -> Self {
        Self {
            min_ms: -1.0,
            avg_ms: -1.0,
            max_ms: -1.0,
            std_ms: -1.0,
            loss,
        }
    }
}

impl fmt::Display for LatencySample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.3}\t{:.3}\t{:.3}\t{:.3}\t{:.1}",
            self.min_ms, self.avg_ms, self.max_ms, self.std_ms, self.loss
        )
    }
}

/// One responding router on a traced route
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hop {
    pub address: IpAddr,
    pub rtt: Duration,
}

/// Route to a host, one entry per TTL. `None` marks a hop that never answered.
#[derive(Debug, Clone, Default)]
pub struct TraceResult {
    pub hops: Vec<Option<Hop>>,
}

impl TraceResult {
    pub fn new(hops: Vec<Option<Hop>>) -> Self {
        Self { hops }
    }

    /// Addresses along the route, `None` for silent hops
    pub fn route(&self) -> impl Iterator<Item = Option<IpAddr>> + '_ {
        self.hops.iter().map(|hop| hop.map(|h| h.address))
    }
}

/// Two traces are equal when they take the same path; round-trip times are ignored.
impl PartialEq for TraceResult {
    fn eq(&self, other: &Self) -> bool {
        self.hops.len() == other.hops.len() && self.route().eq(other.route())
    }
}

impl fmt::Display for TraceResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, hop) in self.hops.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            match hop {
                Some(hop) => write!(f, "{}\t{}\t{:.3}", i + 1, hop.address, millis(hop.rtt))?,
                None => write!(f, "{}\t*", i + 1)?,
            }
        }
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(untagged)]
enum HopEntry {
    Responded { addr: String, rtt: f64 },
    Silent(&'static str),
}

impl Serialize for TraceResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.hops.iter().map(|hop| match hop {
            Some(hop) => HopEntry::Responded {
                addr: hop.address.to_string(),
                rtt: millis(hop.rtt),
            },
            None => HopEntry::Silent("*"),
        }))
    }
}

/// Connect times for the ports in [`SCAN_PORTS`]; `None` when the port did not accept.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScanResult {
    pub http: Option<Duration>,
    pub https: Option<Duration>,
    pub mysql: Option<Duration>,
}

impl ScanResult {
    fn timings(&self) -> [f64; 3] {
        [self.http, self.https, self.mysql].map(|t| t.map(millis).unwrap_or(-1.0))
    }
}

impl fmt::Display for ScanResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [http, https, mysql] = self.timings();
        write!(f, "{:.3}\t{:.3}\t{:.3}", http, https, mysql)
    }
}

impl Serialize for ScanResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let timings = self.timings();
        let mut state = serializer.serialize_struct("ScanResult", SCAN_PORTS.len())?;
        for ((_, name), value) in SCAN_PORTS.iter().zip(timings) {
            state.serialize_field(*name, &value)?;
        }
        state.end()
    }
}

/// Most recent outcome of a probe
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ProbeResult {
    Latency(LatencySample),
    Trace(TraceResult),
    Scan(ScanResult),
    /// Never measured, or the last attempt timed out or failed
    #[default]
    Absent,
}

impl ProbeResult {
    pub fn is_absent(&self) -> bool {
        matches!(self, ProbeResult::Absent)
    }

    /// Structured form of the result, `None` when absent
    pub fn to_json(&self) -> Option<serde_json::Value> {
        let value = match self {
            ProbeResult::Latency(sample) => serde_json::to_value(sample),
            ProbeResult::Trace(trace) => serde_json::to_value(trace),
            ProbeResult::Scan(scan) => serde_json::to_value(scan),
            ProbeResult::Absent => return None,
        };
        value.ok()
    }
}

impl fmt::Display for ProbeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeResult::Latency(sample) => sample.fmt(f),
            ProbeResult::Trace(trace) => trace.fmt(f),
            ProbeResult::Scan(scan) => scan.fmt(f),
            ProbeResult::Absent => Ok(()),
        }
    }
}

/// Outcome of resolving a configured host name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressInfo {
    pub address: IpAddr,
}

impl AddressInfo {
    pub fn new(address: IpAddr) -> Self {
        Self { address }
    }
}
