//! Host list parsing and loading.
//!
//! Each non-blank line names one host followed by `KEY=VALUE` options:
//!
//! ```text
//! example.com PING=250 TRACE=60000 SCAN=0 JSON=true
//! 10.0.0.1 NUMPINGS=5 PAYLOAD=64 TIMESTAMP=0
//! ```
//!
//! A line that fails to parse or resolve is skipped with a diagnostic; the
//! load fails only when no line yields a host.

use common::Error;
use probe::{ProbeProvider, ProbeType};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};
use validator::{Validate, ValidationError};

pub const DEFAULT_HOPS: u32 = 30;
pub const DEFAULT_NUM_PINGS: u32 = 10;
pub const DEFAULT_PAYLOAD_SIZE: usize = 43;
pub const DEFAULT_PING_CADENCE_MS: f64 = 500.0;

/// Longest accepted cadence: one day.
const MAX_CADENCE_MS: f64 = 86_400_000.0;

/// Shortest effective cadence; smaller positive values are rounded up.
const MIN_CADENCE: Duration = Duration::from_millis(1);

/// Error for a single host line
#[derive(Debug, Error)]
pub enum HostParseError {
    #[error("unknown option '{0}'")]
    UnknownOption(String),

    #[error("malformed option '{0}', expected KEY=VALUE")]
    MalformedToken(String),

    #[error("error parsing value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },

    #[error("invalid host options: {0}")]
    Invalid(#[from] validator::ValidationErrors),

    #[error("unable to resolve host ( {0} )")]
    Unresolvable(String),
}

/// How records for a host are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Plaintext,
    Structured,
}

/// Options given on a host line, with defaults for anything omitted
#[derive(Debug, Clone, PartialEq, Validate)]
#[validate(schema(function = "validate_enabled_probes"))]
pub struct HostOptions {
    /// Latency cadence in milliseconds, 0 disables
    #[validate(range(min = 0.0, max = 86_400_000.0))]
    pub ping_ms: f64,

    /// Trace cadence in milliseconds, 0 disables
    #[validate(range(min = 0.0, max = 86_400_000.0))]
    pub trace_ms: f64,

    /// Port scan cadence in milliseconds, 0 disables
    #[validate(range(min = 0.0, max = 86_400_000.0))]
    pub scan_ms: f64,

    #[validate(range(min = 1, max = 1000))]
    pub num_pings: u32,

    #[validate(range(max = 65000))]
    pub payload_size: usize,

    #[validate(range(min = 1, max = 255))]
    pub max_hops: u32,

    pub json: bool,

    pub timestamp: bool,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            ping_ms: DEFAULT_PING_CADENCE_MS,
            trace_ms: 0.0,
            scan_ms: 0.0,
            num_pings: DEFAULT_NUM_PINGS,
            payload_size: DEFAULT_PAYLOAD_SIZE,
            max_hops: DEFAULT_HOPS,
            json: false,
            timestamp: true,
        }
    }
}

fn validate_enabled_probes(options: &HostOptions) -> Result<(), ValidationError> {
    if options.ping_ms == 0.0 && options.trace_ms == 0.0 && options.scan_ms == 0.0 {
        return Err(ValidationError::new("no_probes_enabled"));
    }
    Ok(())
}

impl HostOptions {
    /// Cadence in milliseconds configured for a probe type
    pub fn cadence_ms(&self, probe: ProbeType) -> f64 {
        match probe {
            ProbeType::Latency => self.ping_ms,
            ProbeType::Trace => self.trace_ms,
            ProbeType::PortScan => self.scan_ms,
        }
    }

    /// Apply one `KEY=VALUE` token. Keys are case-insensitive.
    fn apply(&mut self, token: &str) -> Result<(), HostParseError> {
        let (key, value) = token
            .split_once('=')
            .ok_or_else(|| HostParseError::MalformedToken(token.to_string()))?;
        let key = key.to_ascii_uppercase();

        let invalid = || HostParseError::InvalidValue {
            key: key.clone(),
            value: value.to_string(),
        };

        let cadence = || {
            value
                .parse::<f64>()
                .ok()
                .filter(|ms| ms.is_finite())
                .ok_or_else(invalid)
        };

        match key.as_str() {
            "PING" => self.ping_ms = cadence()?,
            "TRACE" => self.trace_ms = cadence()?,
            "SCAN" => self.scan_ms = cadence()?,
            "NUMPINGS" => self.num_pings = value.parse().map_err(|_| invalid())?,
            "PAYLOAD" => self.payload_size = value.parse().map_err(|_| invalid())?,
            "HOPS" => self.max_hops = value.parse().map_err(|_| invalid())?,
            "JSON" => self.json = parse_flag(value).ok_or_else(invalid)?,
            "TIMESTAMP" => self.timestamp = parse_flag(value).ok_or_else(invalid)?,
            _ => return Err(HostParseError::UnknownOption(key.clone())),
        }
        Ok(())
    }

    /// Parse and validate the option tokens of one host line
    pub fn parse<'a>(tokens: impl IntoIterator<Item = &'a str>) -> Result<Self, HostParseError> {
        let mut options = Self::default();
        for token in tokens {
            options.apply(token)?;
        }
        options.validate()?;
        Ok(options)
    }
}

/// Parse the JSON/TIMESTAMP flag grammar: an integer (nonzero is true) or
/// `TRUE`/`FALSE` in any case.
pub fn parse_flag(raw: &str) -> Option<bool> {
    if let Ok(n) = raw.parse::<i64>() {
        return Some(n != 0);
    }
    match raw.to_ascii_uppercase().as_str() {
        "TRUE" => Some(true),
        "FALSE" => Some(false),
        _ => None,
    }
}

/// Split a line into its host name and options; `None` for blank lines.
pub fn parse_line(line: &str) -> Option<Result<(&str, HostOptions), HostParseError>> {
    let mut tokens = line.split_whitespace();
    let name = tokens.next()?;
    Some(HostOptions::parse(tokens).map(|options| (name, options)))
}

/// One monitored host
#[derive(Debug, Clone, PartialEq)]
pub struct HostConfig {
    /// 1-based line position in the source; not stable across reloads
    pub id: usize,
    pub display_name: String,
    pub address: IpAddr,
    pub options: HostOptions,
}

impl HostConfig {
    pub fn new(id: usize, display_name: impl Into<String>, address: IpAddr, options: HostOptions) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            address,
            options,
        }
    }

    /// Interval between runs of `probe`, `None` when disabled
    pub fn cadence(&self, probe: ProbeType) -> Option<Duration> {
        let ms = self.options.cadence_ms(probe);
        (ms > 0.0).then(|| {
            Duration::from_secs_f64(ms.min(MAX_CADENCE_MS) / 1000.0).max(MIN_CADENCE)
        })
    }

    /// Enabled probe types in rendering order
    pub fn enabled_probes(&self) -> Vec<ProbeType> {
        ProbeType::ALL
            .into_iter()
            .filter(|probe| self.cadence(*probe).is_some())
            .collect()
    }

    /// Fastest configured cadence
    pub fn min_cadence(&self) -> Option<Duration> {
        ProbeType::ALL.into_iter().filter_map(|p| self.cadence(p)).min()
    }

    pub fn output_mode(&self) -> OutputMode {
        if self.options.json {
            OutputMode::Structured
        } else {
            OutputMode::Plaintext
        }
    }

    pub fn include_timestamp(&self) -> bool {
        self.options.timestamp
    }

    pub fn max_hops(&self) -> u8 {
        self.options.max_hops.clamp(1, u8::MAX as u32) as u8
    }
}

/// Where the host list comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostSource {
    /// A file that can be re-read on reload
    File(PathBuf),
    /// Standard input, readable exactly once
    Stdin,
}

impl HostSource {
    pub fn from_arg(path: Option<PathBuf>) -> Self {
        path.map(HostSource::File).unwrap_or(HostSource::Stdin)
    }

    pub fn is_reloadable(&self) -> bool {
        matches!(self, HostSource::File(_))
    }

    /// Read the whole source
    pub async fn read(&self) -> common::Result<String> {
        match self {
            HostSource::File(path) => tokio::fs::read_to_string(path).await.map_err(|e| {
                Error::config(format!("Couldn't read input file '{}': {}", path.display(), e))
            }),
            HostSource::Stdin => {
                let mut text = String::new();
                tokio::io::stdin().read_to_string(&mut text).await?;
                Ok(text)
            }
        }
    }
}

impl std::fmt::Display for HostSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostSource::File(path) => write!(f, "{}", path.display()),
            HostSource::Stdin => f.write_str("<stdin>"),
        }
    }
}

/// Parse a host list, resolving each host through `provider`.
///
/// Bad lines are reported and skipped. Fails only if no host remains.
pub async fn parse_hosts(text: &str, provider: &dyn ProbeProvider) -> common::Result<Vec<HostConfig>> {
    let mut hosts = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let line_no = index + 1;
        let (name, options) = match parse_line(line) {
            None => continue,
            Some(Ok(parsed)) => parsed,
            Some(Err(e)) => {
                warn!(line = line_no, error = %e, "Skipping host");
                continue;
            }
        };

        let Some(info) = provider.resolve_address(name).await else {
            let e = HostParseError::Unresolvable(name.to_string());
            warn!(line = line_no, error = %e, "Skipping host");
            continue;
        };

        debug!(line = line_no, host = name, address = %info.address, ?options, "Parsed host");
        hosts.push(HostConfig::new(line_no, name, info.address, options));
    }

    if hosts.is_empty() {
        return Err(Error::config("No hosts could be parsed!"));
    }

    info!(count = hosts.len(), "Loaded host configuration");
    Ok(hosts)
}

/// Read `source` and parse it into hosts
pub async fn load_hosts(source: &HostSource, provider: &dyn ProbeProvider) -> common::Result<Vec<HostConfig>> {
    info!(source = %source, "Reading host configuration");
    let text = source.read().await?;
    parse_hosts(&text, provider).await
}
