//! connmonitor - continuous connection monitoring daemon
//!
//! Watches reachability and path characteristics of a list of hosts and
//! writes one record per host each time one of its probes completes.
//!
//! # Components
//!
//! - **Hosts**: parses the host list, one host and its options per line
//! - **Collector**: one per host, runs each enabled probe on its own cadence
//! - **Output**: renders records as plaintext or JSON and writes them to stdout
//! - **Orchestrator**: starts collectors, checks liveness, handles reload and terminate
//!
//! Probes themselves are performed through [`probe::ProbeProvider`].

pub mod collector;
pub mod control;
pub mod hosts;
pub mod orchestrator;
pub mod output;
pub mod settings;

pub use collector::{Collector, CollectorPhase, CollectorState, ProbeCache, ProbeScheduler, ProbeTimeouts};
pub use hosts::{HostConfig, HostOptions, HostParseError, HostSource, OutputMode, load_hosts, parse_hosts};
pub use orchestrator::{ControlSignal, ControlState, Orchestrator, OrchestratorOptions, Outcome};
pub use output::{OutputFormatter, OutputWriter};
pub use settings::{Settings, SettingsError};
