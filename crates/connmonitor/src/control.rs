//! Process signal handling.

use crate::orchestrator::ControlSignal;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Maps SIGHUP to reload and SIGTERM or Ctrl-C to terminate
pub struct SignalListener {
    hangup: Signal,
    terminate: Signal,
}

impl SignalListener {
    /// Register the signal handlers
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            hangup: signal(SignalKind::hangup())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Wait for the next control signal
    pub async fn recv(&mut self) -> ControlSignal {
        tokio::select! {
            Some(()) = self.hangup.recv() => {
                info!("Received hangup signal");
                ControlSignal::Reload
            }
            Some(()) = self.terminate.recv() => {
                info!("Received terminate signal");
                ControlSignal::Terminate
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C signal");
                ControlSignal::Terminate
            }
        }
    }

    /// Forward signals to `tx` until the receiver goes away
    pub async fn forward(mut self, tx: mpsc::Sender<ControlSignal>) {
        loop {
            let signal = self.recv().await;
            if tx.send(signal).await.is_err() {
                debug!("Control loop gone, signal listener exiting");
                break;
            }
        }
    }
}
