//! Per-host collector.
//!
//! A [`Collector`] runs one loop per enabled probe type. Each loop waits for
//! its cadence, runs the probe under a deadline, folds the result into the
//! host's shared [`CollectorState`] and hands any resulting record to the
//! output channel. Probe failures never end a collector; a closed output
//! channel does.

use crate::hosts::HostConfig;
use crate::output::OutputFormatter;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use common::Error;
use probe::{ProbeError, ProbeProvider, ProbeResult, ProbeType};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{MissedTickBehavior, interval, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Most recent result per probe type
pub type ProbeCache = BTreeMap<ProbeType, ProbeResult>;

/// Per-wait timeouts handed to the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeTimeouts {
    /// One echo reply
    pub ping: Duration,
    /// One trace hop
    pub hop: Duration,
    /// One port connection, and the bound on a whole scan
    pub scan: Duration,
}

impl Default for ProbeTimeouts {
    fn default() -> Self {
        Self {
            ping: Duration::from_millis(500),
            hop: Duration::from_millis(500),
            scan: Duration::from_millis(500),
        }
    }
}

/// Strategy for one probe type of one host
#[async_trait]
pub trait ProbeScheduler: Send + Sync {
    fn probe_type(&self) -> ProbeType;

    /// Interval between runs
    fn cadence(&self) -> Duration;

    /// Upper bound on one run
    fn deadline(&self) -> Duration;

    async fn probe(&self, provider: &dyn ProbeProvider, address: IpAddr) -> Result<ProbeResult, ProbeError>;
}

/// Latency rounds of `num_pings` echo requests
pub struct LatencyScheduler {
    cadence: Duration,
    num_pings: u32,
    payload_size: usize,
    timeout: Duration,
}

#[async_trait]
impl ProbeScheduler for LatencyScheduler {
    fn probe_type(&self) -> ProbeType {
        ProbeType::Latency
    }

    fn cadence(&self) -> Duration {
        self.cadence
    }

    // Requests go out back to back, allow a millisecond of spacing per send.
    fn deadline(&self) -> Duration {
        self.timeout + Duration::from_millis(self.num_pings as u64)
    }

    async fn probe(&self, provider: &dyn ProbeProvider, address: IpAddr) -> Result<ProbeResult, ProbeError> {
        provider
            .measure_latency(address, self.num_pings, self.payload_size, self.timeout)
            .await
            .map(ProbeResult::Latency)
    }
}

/// Route traces of up to `max_hops` hops
pub struct TraceScheduler {
    cadence: Duration,
    max_hops: u8,
    hop_timeout: Duration,
}

#[async_trait]
impl ProbeScheduler for TraceScheduler {
    fn probe_type(&self) -> ProbeType {
        ProbeType::Trace
    }

    fn cadence(&self) -> Duration {
        self.cadence
    }

    // A route with every hop silent waits the full hop timeout per hop.
    fn deadline(&self) -> Duration {
        (self.hop_timeout + Duration::from_millis(1)) * self.max_hops as u32
    }

    async fn probe(&self, provider: &dyn ProbeProvider, address: IpAddr) -> Result<ProbeResult, ProbeError> {
        provider
            .trace_route(address, self.max_hops, self.hop_timeout)
            .await
            .map(ProbeResult::Trace)
    }
}

/// Port scans of the well-known ports
pub struct ScanScheduler {
    cadence: Duration,
    timeout: Duration,
}

#[async_trait]
impl ProbeScheduler for ScanScheduler {
    fn probe_type(&self) -> ProbeType {
        ProbeType::PortScan
    }

    fn cadence(&self) -> Duration {
        self.cadence
    }

    fn deadline(&self) -> Duration {
        self.timeout
    }

    async fn probe(&self, provider: &dyn ProbeProvider, address: IpAddr) -> Result<ProbeResult, ProbeError> {
        provider
            .scan_ports(address, self.timeout)
            .await
            .map(ProbeResult::Scan)
    }
}

/// Build a scheduler for every probe `config` enables
pub fn schedulers_for(config: &HostConfig, timeouts: ProbeTimeouts) -> Vec<Arc<dyn ProbeScheduler>> {
    config
        .enabled_probes()
        .into_iter()
        .filter_map(|probe| {
            let cadence = config.cadence(probe)?;
            let scheduler: Arc<dyn ProbeScheduler> = match probe {
                ProbeType::Latency => Arc::new(LatencyScheduler {
                    cadence,
                    num_pings: config.options.num_pings,
                    payload_size: config.options.payload_size,
                    timeout: timeouts.ping,
                }),
                ProbeType::Trace => Arc::new(TraceScheduler {
                    cadence,
                    max_hops: config.max_hops(),
                    hop_timeout: timeouts.hop,
                }),
                ProbeType::PortScan => Arc::new(ScanScheduler {
                    cadence,
                    timeout: timeouts.scan,
                }),
            };
            Some(scheduler)
        })
        .collect()
}

/// Result cache and suppression state of one host
#[derive(Debug)]
pub struct CollectorState {
    config: Arc<HostConfig>,
    formatter: OutputFormatter,
    cache: ProbeCache,
    last_emitted_trace: ProbeResult,
}

impl CollectorState {
    pub fn new(config: Arc<HostConfig>) -> Self {
        let formatter = OutputFormatter::for_host(&config);
        let cache = config
            .enabled_probes()
            .into_iter()
            .map(|probe| (probe, ProbeResult::Absent))
            .collect();

        Self {
            config,
            formatter,
            cache,
            last_emitted_trace: ProbeResult::Absent,
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn cache(&self) -> &ProbeCache {
        &self.cache
    }

    /// Fold one probe outcome into the cache and return the record to
    /// emit, if any.
    ///
    /// A trace equal to the last emitted one produces nothing. A trace that
    /// does go out occupies the cache only for that record.
    pub fn apply(&mut self, probe: ProbeType, result: ProbeResult, now: DateTime<Local>) -> Option<String> {
        if probe != ProbeType::Trace {
            self.cache.insert(probe, result);
            return Some(self.formatter.render(&self.cache, now));
        }

        if result == self.last_emitted_trace {
            debug!(host = %self.config.display_name, "Trace unchanged");
            return None;
        }

        self.last_emitted_trace = result.clone();
        self.cache.insert(ProbeType::Trace, result);
        let record = self.formatter.render(&self.cache, now);
        self.cache.insert(ProbeType::Trace, ProbeResult::Absent);
        Some(record)
    }
}

/// Lifecycle of a collector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorPhase {
    Idle,
    Running,
    Stopped,
}

/// Everything a probe loop needs, shared by the loops of one collector
struct Shared {
    provider: Arc<dyn ProbeProvider>,
    state: Mutex<CollectorState>,
    output: mpsc::Sender<String>,
    cancel: CancellationToken,
}

/// Runs the probes of one host
pub struct Collector {
    config: Arc<HostConfig>,
    provider: Arc<dyn ProbeProvider>,
    schedulers: Vec<Arc<dyn ProbeScheduler>>,
    output: mpsc::Sender<String>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<common::Result<()>>>,
}

impl Collector {
    pub fn new(
        config: HostConfig,
        provider: Arc<dyn ProbeProvider>,
        timeouts: ProbeTimeouts,
        output: mpsc::Sender<String>,
    ) -> Self {
        let schedulers = schedulers_for(&config, timeouts);
        Self {
            config: Arc::new(config),
            provider,
            schedulers,
            output,
            cancel: CancellationToken::new(),
            handle: None,
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn phase(&self) -> CollectorPhase {
        match &self.handle {
            Some(handle) if !handle.is_finished() => CollectorPhase::Running,
            Some(_) => CollectorPhase::Stopped,
            None if self.cancel.is_cancelled() => CollectorPhase::Stopped,
            None => CollectorPhase::Idle,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.phase() == CollectorPhase::Running
    }

    /// Fastest cadence among this collector's probes
    pub fn min_cadence(&self) -> Option<Duration> {
        self.schedulers.iter().map(|s| s.cadence()).min()
    }

    /// Spawn the probe loops. Does nothing unless the collector is idle.
    pub fn start(&mut self) {
        if self.phase() != CollectorPhase::Idle {
            return;
        }

        info!(
            id = self.config.id,
            host = %self.config.display_name,
            address = %self.config.address,
            probes = ?self.config.enabled_probes(),
            "Starting collector"
        );

        let shared = Arc::new(Shared {
            provider: self.provider.clone(),
            state: Mutex::new(CollectorState::new(self.config.clone())),
            output: self.output.clone(),
            cancel: self.cancel.clone(),
        });
        let schedulers = self.schedulers.clone();
        let host = self.config.display_name.clone();

        self.handle = Some(tokio::spawn(async move {
            let result = run_collector(shared, schedulers).await;
            if let Err(e) = &result {
                error!(host = %host, error = %e, "Collector stopped");
            }
            result
        }));
    }

    /// Ask every probe loop to finish and wait for them
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        debug!(id = self.config.id, host = %self.config.display_name, "Collector stopped");
    }

    /// Cancel and abort the probe loops without waiting for them to wind down
    pub async fn terminate(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
        debug!(id = self.config.id, host = %self.config.display_name, "Collector terminated");
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_collector(shared: Arc<Shared>, schedulers: Vec<Arc<dyn ProbeScheduler>>) -> common::Result<()> {
    // Dropping the set aborts any loop still running.
    let mut loops = JoinSet::new();
    for scheduler in schedulers {
        loops.spawn(probe_loop(shared.clone(), scheduler));
    }

    let mut outcome = Ok(());
    while let Some(joined) = loops.join_next().await {
        let result = match joined {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(Error::other(format!("probe loop panicked: {}", e))),
        };
        if let Err(e) = result {
            shared.cancel.cancel();
            if outcome.is_ok() {
                outcome = Err(e);
            }
        }
    }
    outcome
}

async fn probe_loop(shared: Arc<Shared>, scheduler: Arc<dyn ProbeScheduler>) -> common::Result<()> {
    let probe = scheduler.probe_type();
    let deadline = scheduler.deadline();
    let address = shared.state.lock().await.config().address;

    let mut ticker = interval(scheduler.cadence());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => return Ok(()),
            _ = ticker.tick() => {}
        }

        let outcome = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => return Ok(()),
            outcome = timeout(deadline, scheduler.probe(shared.provider.as_ref(), address)) => {
                outcome.unwrap_or(Err(ProbeError::Timeout(deadline)))
            }
        };

        let result = outcome.unwrap_or_else(|e| {
            warn!(address = %address, probe = %probe, error = %e, "Probe failed");
            ProbeResult::Absent
        });

        let mut state = shared.state.lock().await;
        if let Some(record) = state.apply(probe, result, Local::now()) {
            tokio::select! {
                biased;
                _ = shared.cancel.cancelled() => return Ok(()),
                sent = shared.output.send(record) => {
                    sent.map_err(|_| Error::output("output stream closed"))?;
                }
            }
        }
    }
}
