//! connmonitor binary

use anyhow::Context;
use clap::Parser;
use connmonitor::control::SignalListener;
use connmonitor::{HostSource, Orchestrator, OrchestratorOptions, Outcome, OutputWriter, Settings};
use probe::{NetworkProvider, ProbeProvider};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// How long shutdown waits for blocking reads and probes still in flight
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Continuously monitor network connections to a list of hosts
#[derive(Debug, Parser)]
#[command(name = "connmonitor", version, about)]
struct Cli {
    /// Host list file; standard input when omitted
    config: Option<PathBuf>,

    /// Daemon settings file (YAML)
    #[arg(long, env = "CONNMONITOR_SETTINGS")]
    settings: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Settings come first since they carry the log configuration
    let settings = match Settings::load(cli.settings.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Settings error: {}", e);
            eprintln!("Using default settings");
            Settings::default()
        }
    };

    let level = settings.logging.level.as_deref().unwrap_or("info");
    if settings.json_logs() {
        common::logging::init_json(level);
    } else {
        common::logging::init(level);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build runtime");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(run(cli, settings));
    // A pending stdin read or blocking probe would otherwise hold the process open.
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, settings: Settings) -> anyhow::Result<u8> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "connmonitor starting");

    let (record_tx, record_rx) = mpsc::channel::<String>(settings.output.channel_size);
    let writer = tokio::spawn(OutputWriter::new(record_rx, tokio::io::stdout()).run());

    let listener = SignalListener::install().context("failed to install signal handlers")?;
    let (signal_tx, mut signal_rx) = mpsc::channel(8);
    tokio::spawn(listener.forward(signal_tx));

    let options = OrchestratorOptions {
        timeouts: settings.probe_timeouts(),
        min_tick: settings.supervisor.min_tick,
    };
    let source = HostSource::from_arg(cli.config);

    let provider: Arc<dyn ProbeProvider> = Arc::new(NetworkProvider::new());
    tracing::info!(provider = provider.name(), source = %source, "Loading hosts");

    // Signal handlers are already installed, so terminate must be honoured while loading.
    let started =
        Orchestrator::start_with_signals(source, provider, record_tx, options, &mut signal_rx)
            .await
            .context("failed to start")?;

    let outcome = match started {
        Some(orchestrator) => orchestrator.run(signal_rx).await,
        None => Outcome::Terminated,
    };

    // Every sender is gone once the orchestrator is dropped; drain what is queued.
    writer
        .await
        .context("output writer panicked")?
        .context("output writer failed")?;

    tracing::info!(?outcome, "connmonitor stopped");
    Ok(outcome.exit_code())
}
