//! Collector supervision, reload and terminate.

use crate::collector::{Collector, ProbeTimeouts};
use crate::hosts::{HostConfig, HostSource, load_hosts};
use futures::future::join_all;
use probe::ProbeProvider;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

/// External request delivered to the control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Reload,
    Terminate,
}

/// What the control loop does on its next iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    Running,
    ReloadRequested,
    StopRequested,
}

/// Why the control loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Terminate was requested
    Terminated,
    /// No collector was left alive at a liveness check
    AllCollectorsDied,
}

impl Outcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            Outcome::Terminated => 0,
            Outcome::AllCollectorsDied => 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorOptions {
    pub timeouts: ProbeTimeouts,
    /// Floor for the liveness check interval
    pub min_tick: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            timeouts: ProbeTimeouts::default(),
            min_tick: Duration::from_millis(100),
        }
    }
}

/// Liveness check interval: the smallest positive cadence among `hosts`,
/// never below `floor`.
pub fn supervisory_tick(hosts: &[HostConfig], floor: Duration) -> Duration {
    hosts
        .iter()
        .filter_map(HostConfig::min_cadence)
        .min()
        .map_or(floor, |tick| tick.max(floor))
}

/// Everything the control loop owns
pub struct OrchestratorState {
    pub collectors: Vec<Collector>,
    pub hosts: Vec<HostConfig>,
    pub source: HostSource,
    pub tick: Duration,
    pub control: ControlState,
}

/// Owns the collectors and reacts to control signals
pub struct Orchestrator {
    provider: Arc<dyn ProbeProvider>,
    output: mpsc::Sender<String>,
    options: OrchestratorOptions,
    state: OrchestratorState,
}

impl Orchestrator {
    /// Load hosts from `source` and start one collector per host.
    ///
    /// Fails if the source cannot be read or yields no hosts.
    pub async fn start(
        source: HostSource,
        provider: Arc<dyn ProbeProvider>,
        output: mpsc::Sender<String>,
        options: OrchestratorOptions,
    ) -> common::Result<Self> {
        let hosts = load_hosts(&source, provider.as_ref()).await?;
        Ok(Self::with_hosts(hosts, source, provider, output, options))
    }

    /// Like [`Orchestrator::start`], but returns `Ok(None)` if terminate
    /// arrives on `signals` before the host list has finished loading.
    ///
    /// Reload requests received while loading are dropped.
    pub async fn start_with_signals(
        source: HostSource,
        provider: Arc<dyn ProbeProvider>,
        output: mpsc::Sender<String>,
        options: OrchestratorOptions,
        signals: &mut mpsc::Receiver<ControlSignal>,
    ) -> common::Result<Option<Self>> {
        let hosts = {
            let load = load_hosts(&source, provider.as_ref());
            tokio::pin!(load);
            let mut listening = true;

            loop {
                tokio::select! {
                    hosts = &mut load => break hosts?,
                    signal = signals.recv(), if listening => match signal {
                        Some(ControlSignal::Terminate) => {
                            info!(source = %source, "Terminated while loading hosts");
                            return Ok(None);
                        }
                        Some(ControlSignal::Reload) => debug!("Reload ignored while loading hosts"),
                        None => listening = false,
                    },
                }
            }
        };

        Ok(Some(Self::with_hosts(hosts, source, provider, output, options)))
    }

    /// Start collectors for an already loaded host list
    pub fn with_hosts(
        hosts: Vec<HostConfig>,
        source: HostSource,
        provider: Arc<dyn ProbeProvider>,
        output: mpsc::Sender<String>,
        options: OrchestratorOptions,
    ) -> Self {
        let mut orchestrator = Self {
            provider,
            output,
            options,
            state: OrchestratorState {
                collectors: Vec::new(),
                tick: options.min_tick,
                hosts,
                source,
                control: ControlState::Running,
            },
        };
        orchestrator.start_collectors();
        orchestrator
    }

    pub fn state(&self) -> &OrchestratorState {
        &self.state
    }

    pub fn collector_count(&self) -> usize {
        self.state.collectors.len()
    }

    pub fn live_collectors(&self) -> usize {
        self.state.collectors.iter().filter(|c| c.is_alive()).count()
    }

    pub fn tick(&self) -> Duration {
        self.state.tick
    }

    fn start_collectors(&mut self) {
        self.state.collectors = self
            .state
            .hosts
            .iter()
            .map(|host| {
                let mut collector = Collector::new(
                    host.clone(),
                    self.provider.clone(),
                    self.options.timeouts,
                    self.output.clone(),
                );
                collector.start();
                collector
            })
            .collect();

        self.state.tick = supervisory_tick(&self.state.hosts, self.options.min_tick);
        info!(
            collectors = self.state.collectors.len(),
            tick = ?self.state.tick,
            "Collectors started"
        );
    }

    async fn stop_collectors(&mut self) {
        join_all(self.state.collectors.iter_mut().map(|c| c.stop())).await;
        self.state.collectors.clear();
    }

    /// Stop every collector, re-read the source and start fresh collectors.
    ///
    /// When the source cannot be re-read or yields nothing the previous host
    /// set is restarted.
    pub async fn reload(&mut self) {
        info!(source = %self.state.source, "Reloading host configuration");
        self.stop_collectors().await;

        if self.state.source.is_reloadable() {
            match load_hosts(&self.state.source, self.provider.as_ref()).await {
                Ok(hosts) => self.state.hosts = hosts,
                Err(e) => error!(error = %e, "Reload failed, keeping previous hosts"),
            }
        } else {
            error!(
                source = %self.state.source,
                "Host configuration cannot be re-read, restarting previous hosts"
            );
        }

        self.start_collectors();
    }

    /// Forcefully stop every collector
    pub async fn terminate(&mut self) {
        info!(collectors = self.state.collectors.len(), "Terminating collectors");
        join_all(self.state.collectors.iter_mut().map(|c| c.terminate())).await;
        self.state.collectors.clear();
    }

    fn new_ticker(&self) -> Interval {
        let mut ticker = interval(self.state.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    /// Supervise collectors until terminated or until none is left alive.
    pub async fn run(mut self, mut signals: mpsc::Receiver<ControlSignal>) -> Outcome {
        let mut ticker = self.new_ticker();
        ticker.tick().await; // Skip first immediate tick
        let mut listening = true;

        loop {
            match self.state.control {
                ControlState::Running => {}
                ControlState::ReloadRequested => {
                    self.reload().await;
                    ticker = self.new_ticker();
                    ticker.tick().await;
                    self.state.control = ControlState::Running;
                }
                ControlState::StopRequested => {
                    self.terminate().await;
                    info!("Terminated");
                    return Outcome::Terminated;
                }
            }

            tokio::select! {
                signal = signals.recv(), if listening => match signal {
                    Some(ControlSignal::Reload) => self.state.control = ControlState::ReloadRequested,
                    Some(ControlSignal::Terminate) => self.state.control = ControlState::StopRequested,
                    None => {
                        warn!("Control signal source closed");
                        listening = false;
                    }
                },
                _ = ticker.tick() => {
                    if self.live_collectors() == 0 {
                        error!("All collectors have died");
                        self.terminate().await;
                        return Outcome::AllCollectorsDied;
                    }
                }
            }
        }
    }
}
