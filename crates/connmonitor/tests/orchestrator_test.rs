//! Integration tests for Orchestrator startup, reload and terminate

mod support;

use connmonitor::{
    ControlSignal, HostSource, Orchestrator, OrchestratorOptions, Outcome, parse_hosts,
};
use probe::ProbeProvider;
use std::sync::Arc;
use std::time::{Duration, Instant};
use support::{ScriptedProvider, temp_hosts_file};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

fn options() -> OrchestratorOptions {
    OrchestratorOptions {
        min_tick: Duration::from_millis(20),
        ..OrchestratorOptions::default()
    }
}

fn provider(provider: ScriptedProvider) -> Arc<dyn ProbeProvider> {
    Arc::new(provider)
}

#[tokio::test]
async fn test_startup_skips_unresolvable_host() {
    let path = temp_hosts_file(
        "startup",
        "10.0.0.1 PING=100\nnowhere.invalid\nexample.com PING=100\n",
    );
    let provider = provider(ScriptedProvider::new().with_unresolvable("nowhere.invalid"));
    let (tx, _rx) = mpsc::channel(64);

    let mut orchestrator = Orchestrator::start(HostSource::File(path.clone()), provider, tx, options())
        .await
        .unwrap();

    assert_eq!(orchestrator.collector_count(), 2);
    assert_eq!(orchestrator.live_collectors(), 2);
    assert_eq!(orchestrator.tick(), Duration::from_millis(100));

    orchestrator.terminate().await;
    assert_eq!(orchestrator.collector_count(), 0);
    std::fs::remove_file(path).unwrap();
}

#[tokio::test]
async fn test_zero_hosts_fails_startup() {
    let path = temp_hosts_file("empty", "10.0.0.1 PING=0\n\n10.0.0.2 BOGUS=1\n");
    let (tx, _rx) = mpsc::channel(64);

    let result = Orchestrator::start(
        HostSource::File(path.clone()),
        provider(ScriptedProvider::new()),
        tx,
        options(),
    )
    .await;

    assert!(result.is_err());
    std::fs::remove_file(path).unwrap();
}

#[tokio::test]
async fn test_terminate_while_loading_hosts() {
    let path = temp_hosts_file("stalled", "example.com PING=100\n");
    let provider = provider(ScriptedProvider::new().hanging_resolve());
    let (tx, mut rx) = mpsc::channel(64);
    let (signal_tx, mut signal_rx) = mpsc::channel(4);

    signal_tx.send(ControlSignal::Reload).await.unwrap();
    signal_tx.send(ControlSignal::Terminate).await.unwrap();

    let started = timeout(
        Duration::from_secs(1),
        Orchestrator::start_with_signals(
            HostSource::File(path.clone()),
            provider,
            tx,
            options(),
            &mut signal_rx,
        ),
    )
    .await
    .expect("terminate should interrupt host loading")
    .unwrap();

    assert!(started.is_none());
    // No collector was started and the output sender is gone
    assert!(rx.recv().await.is_none());
    std::fs::remove_file(path).unwrap();
}

#[tokio::test]
async fn test_loading_completes_without_signals() {
    let path = temp_hosts_file("quiet", "10.0.0.1 PING=100\n");
    let (tx, _rx) = mpsc::channel(64);
    let (signal_tx, mut signal_rx) = mpsc::channel(4);
    drop(signal_tx);

    let mut orchestrator = Orchestrator::start_with_signals(
        HostSource::File(path.clone()),
        provider(ScriptedProvider::new()),
        tx,
        options(),
        &mut signal_rx,
    )
    .await
    .unwrap()
    .expect("hosts should load");

    assert_eq!(orchestrator.collector_count(), 1);
    orchestrator.terminate().await;
    std::fs::remove_file(path).unwrap();
}

#[tokio::test]
async fn test_reload_picks_up_changed_file() {
    let path = temp_hosts_file("reload", "10.0.0.1 PING=500\n");
    let (tx, _rx) = mpsc::channel(64);
    let mut orchestrator = Orchestrator::start(
        HostSource::File(path.clone()),
        provider(ScriptedProvider::new()),
        tx,
        options(),
    )
    .await
    .unwrap();
    assert_eq!(orchestrator.collector_count(), 1);
    assert_eq!(orchestrator.tick(), Duration::from_millis(500));

    std::fs::write(&path, "10.0.0.1 PING=500\n10.0.0.2 PING=200\n10.0.0.3 SCAN=1000\n").unwrap();
    orchestrator.reload().await;

    assert_eq!(orchestrator.collector_count(), 3);
    assert_eq!(orchestrator.live_collectors(), 3);
    assert_eq!(orchestrator.tick(), Duration::from_millis(200));

    orchestrator.terminate().await;
    std::fs::remove_file(path).unwrap();
}

#[tokio::test]
async fn test_reload_is_idempotent() {
    let path = temp_hosts_file("same", "10.0.0.1 PING=100 TRACE=300\nexample.com SCAN=250 JSON=1\n");
    let (tx, _rx) = mpsc::channel(64);
    let mut orchestrator = Orchestrator::start(
        HostSource::File(path.clone()),
        provider(ScriptedProvider::new()),
        tx,
        options(),
    )
    .await
    .unwrap();

    let before = orchestrator.state().hosts.clone();
    orchestrator.reload().await;

    assert_eq!(orchestrator.state().hosts, before);
    let probes: Vec<_> = orchestrator
        .state()
        .collectors
        .iter()
        .map(|c| (c.config().enabled_probes(), c.min_cadence()))
        .collect();
    assert_eq!(
        probes,
        before
            .iter()
            .map(|h| (h.enabled_probes(), h.min_cadence()))
            .collect::<Vec<_>>()
    );

    orchestrator.terminate().await;
    std::fs::remove_file(path).unwrap();
}

#[tokio::test]
async fn test_failed_reload_keeps_previous_hosts() {
    let path = temp_hosts_file("vanish", "10.0.0.1 PING=100\n10.0.0.2 PING=100\n");
    let (tx, _rx) = mpsc::channel(64);
    let mut orchestrator = Orchestrator::start(
        HostSource::File(path.clone()),
        provider(ScriptedProvider::new()),
        tx,
        options(),
    )
    .await
    .unwrap();

    std::fs::write(&path, "nothing valid here=\n").unwrap();
    orchestrator.reload().await;
    assert_eq!(orchestrator.collector_count(), 2);

    std::fs::remove_file(&path).unwrap();
    orchestrator.reload().await;
    assert_eq!(orchestrator.collector_count(), 2);
    assert_eq!(orchestrator.live_collectors(), 2);

    orchestrator.terminate().await;
}

#[tokio::test]
async fn test_reload_without_rereadable_source_restarts_hosts() {
    let provider = provider(ScriptedProvider::new());
    let hosts = parse_hosts("10.0.0.1 PING=100\n10.0.0.2 PING=100\n", provider.as_ref())
        .await
        .unwrap();
    let (tx, _rx) = mpsc::channel(64);
    let mut orchestrator =
        Orchestrator::with_hosts(hosts.clone(), HostSource::Stdin, provider, tx, options());

    orchestrator.reload().await;

    assert_eq!(orchestrator.state().hosts, hosts);
    assert_eq!(orchestrator.live_collectors(), 2);
    orchestrator.terminate().await;
}

#[tokio::test]
async fn test_terminate_signal_exits_promptly() {
    let provider = provider(ScriptedProvider::new().hanging_scan());
    let hosts = parse_hosts("10.0.0.1 PING=50 SCAN=50\n", provider.as_ref())
        .await
        .unwrap();
    let (tx, mut rx) = mpsc::channel(64);
    let orchestrator = Orchestrator::with_hosts(hosts, HostSource::Stdin, provider, tx, options());

    let (signal_tx, signal_rx) = mpsc::channel(4);
    let run = tokio::spawn(orchestrator.run(signal_rx));

    // Mid-cycle: the scan is still waiting on its deadline
    rx.recv().await.unwrap();
    let start = Instant::now();
    signal_tx.send(ControlSignal::Terminate).await.unwrap();

    let outcome = timeout(Duration::from_secs(1), run).await.unwrap().unwrap();
    assert_eq!(outcome, Outcome::Terminated);
    assert_eq!(outcome.exit_code(), 0);
    assert!(start.elapsed() < Duration::from_millis(500));

    // Orchestrator dropped: the record stream ends
    while rx.recv().await.is_some() {}
}

#[tokio::test]
async fn test_reload_signal_keeps_running() {
    let path = temp_hosts_file("signal", "10.0.0.1 PING=50\n");
    let (tx, mut rx) = mpsc::channel(64);
    let orchestrator = Orchestrator::start(
        HostSource::File(path.clone()),
        provider(ScriptedProvider::new()),
        tx,
        options(),
    )
    .await
    .unwrap();

    let (signal_tx, signal_rx) = mpsc::channel(4);
    let run = tokio::spawn(orchestrator.run(signal_rx));

    rx.recv().await.unwrap();
    std::fs::write(&path, "10.0.0.9 PING=50\n").unwrap();
    signal_tx.send(ControlSignal::Reload).await.unwrap();

    let record = timeout(Duration::from_secs(1), async {
        loop {
            let record = rx.recv().await.unwrap();
            if record.starts_with("10.0.0.9") {
                return record;
            }
        }
    })
    .await
    .unwrap();
    assert!(record.starts_with("10.0.0.9\n"));

    signal_tx.send(ControlSignal::Terminate).await.unwrap();
    assert_eq!(run.await.unwrap(), Outcome::Terminated);
    std::fs::remove_file(path).unwrap();
}

#[tokio::test]
async fn test_all_collectors_dead_ends_run() {
    let provider = provider(ScriptedProvider::new());
    let hosts = parse_hosts("10.0.0.1 PING=20\n10.0.0.2 PING=20\n", provider.as_ref())
        .await
        .unwrap();
    let (tx, rx) = mpsc::channel(64);
    drop(rx);
    let orchestrator = Orchestrator::with_hosts(hosts, HostSource::Stdin, provider, tx, options());

    let (_signal_tx, signal_rx) = mpsc::channel(4);
    let outcome = timeout(Duration::from_secs(2), orchestrator.run(signal_rx))
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::AllCollectorsDied);
    assert_eq!(outcome.exit_code(), 1);
}

#[tokio::test]
async fn test_closed_signal_source_keeps_supervising() {
    let provider = provider(ScriptedProvider::new());
    let hosts = parse_hosts("10.0.0.1 PING=20\n", provider.as_ref()).await.unwrap();
    let (tx, mut rx) = mpsc::channel(64);
    let orchestrator = Orchestrator::with_hosts(hosts, HostSource::Stdin, provider, tx, options());

    let (signal_tx, signal_rx) = mpsc::channel(4);
    drop(signal_tx);
    let run = tokio::spawn(orchestrator.run(signal_rx));

    sleep(Duration::from_millis(100)).await;
    assert!(!run.is_finished());
    assert!(rx.recv().await.is_some());
    run.abort();
}
