//! Integration tests for Collector scheduling, suppression and fallback

mod support;

use connmonitor::{Collector, CollectorPhase, ProbeTimeouts};
use probe::ProbeProvider;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use support::{ScriptedProvider, host, trace};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, timeout};

fn collector(line: &str, provider: Arc<ScriptedProvider>) -> (Collector, mpsc::Receiver<String>) {
    let (tx, rx) = mpsc::channel(64);
    let provider: Arc<dyn ProbeProvider> = provider;
    let collector = Collector::new(host(line), provider, ProbeTimeouts::default(), tx);
    (collector, rx)
}

fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<String> {
    let mut records = Vec::new();
    while let Ok(record) = rx.try_recv() {
        records.push(record);
    }
    records
}

#[tokio::test(start_paused = true)]
async fn test_latency_only_records_on_cadence() {
    let provider = Arc::new(ScriptedProvider::new());
    let (mut collector, mut rx) = collector("10.0.0.1 PING=250 TRACE=0 SCAN=0 JSON=0", provider);
    collector.start();

    let mut arrivals = Vec::new();
    for _ in 0..4 {
        let record = rx.recv().await.unwrap();
        arrivals.push(Instant::now());

        let lines: Vec<&str> = record.lines().collect();
        assert_eq!(lines.len(), 3, "header, time and latency: {:?}", record);
        assert_eq!(lines[0], "10.0.0.1");
        assert_eq!(lines[2].split('\t').count(), 5);
    }

    for pair in arrivals.windows(2) {
        assert_eq!(pair[1] - pair[0], Duration::from_millis(250));
    }

    collector.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_identical_traces_emit_once() {
    let a = trace(&["10.0.0.254", "10.0.0.1"]);
    let b = trace(&["10.0.0.253", "10.0.0.1"]);
    let provider = Arc::new(ScriptedProvider::new().with_traces(vec![a.clone(), a, b]));
    let (mut collector, mut rx) = collector("10.0.0.1 PING=0 TRACE=100 JSON=1", provider.clone());
    collector.start();

    sleep(Duration::from_millis(1050)).await;
    collector.stop().await;

    let records = drain(&mut rx);
    assert!(provider.trace_calls.load(Ordering::SeqCst) >= 10);
    assert_eq!(records.len(), 2);
    for record in &records {
        let value: serde_json::Value = serde_json::from_str(record).unwrap();
        assert!(value.get("trace").is_some());
    }
}

#[tokio::test(start_paused = true)]
async fn test_latency_records_omit_unchanged_trace() {
    let provider = Arc::new(
        ScriptedProvider::new().with_traces(vec![trace(&["10.0.0.254", "10.0.0.1"])]),
    );
    let (mut collector, mut rx) =
        collector("10.0.0.1 PING=100 TRACE=100 JSON=1 TIMESTAMP=0", provider);
    collector.start();

    sleep(Duration::from_millis(550)).await;
    collector.stop().await;

    let records: Vec<serde_json::Value> = drain(&mut rx)
        .iter()
        .map(|r| serde_json::from_str(r).unwrap())
        .collect();
    let with_trace = records.iter().filter(|r| r.get("trace").is_some()).count();
    let with_ping = records.iter().filter(|r| r.get("ping").is_some()).count();

    assert_eq!(with_trace, 1);
    assert!(with_ping >= 5);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_scan_falls_back_to_absent() {
    let provider = Arc::new(ScriptedProvider::new().hanging_scan());
    let (mut collector, mut rx) = collector("10.0.0.1 PING=0 SCAN=100 JSON=1", provider.clone());
    collector.start();

    let start = Instant::now();
    let mut previous = start;
    for _ in 0..4 {
        let record = rx.recv().await.unwrap();
        let now = Instant::now();
        assert!(now - previous <= Duration::from_millis(500));
        previous = now;

        let value: serde_json::Value = serde_json::from_str(&record).unwrap();
        assert!(value.get("scan").is_none());
    }
    assert_eq!(previous - start, Duration::from_millis(2000));
    assert!(provider.scan_calls.load(Ordering::SeqCst) >= 4);

    collector.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_latency_emits_header_only() {
    let provider = Arc::new(ScriptedProvider::new().failing_latency());
    let (mut collector, mut rx) = collector("10.0.0.1 TIMESTAMP=0", provider);
    collector.start();

    assert_eq!(rx.recv().await.unwrap(), "10.0.0.1\n");
    assert_eq!(rx.recv().await.unwrap(), "10.0.0.1\n");
    assert!(collector.is_alive());

    collector.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_interrupts_probe_wait() {
    let provider = Arc::new(ScriptedProvider::new().hanging_scan());
    let (mut collector, _rx) = collector("10.0.0.1 PING=0 SCAN=1000", provider);

    assert_eq!(collector.phase(), CollectorPhase::Idle);
    collector.start();
    assert_eq!(collector.phase(), CollectorPhase::Running);

    sleep(Duration::from_millis(100)).await;
    timeout(Duration::from_millis(1), collector.stop())
        .await
        .expect("stop should not wait for the probe");

    assert_eq!(collector.phase(), CollectorPhase::Stopped);
    assert!(!collector.is_alive());
}

#[tokio::test(start_paused = true)]
async fn test_closed_output_ends_collector() {
    let provider = Arc::new(ScriptedProvider::new());
    let (mut collector, rx) = collector("10.0.0.1 PING=100", provider);
    drop(rx);

    collector.start();
    sleep(Duration::from_millis(10)).await;

    assert_eq!(collector.phase(), CollectorPhase::Stopped);
    assert!(!collector.is_alive());
}

#[tokio::test(start_paused = true)]
async fn test_terminate_aborts_collector() {
    let provider = Arc::new(ScriptedProvider::new().hanging_scan());
    let (mut collector, _rx) = collector("10.0.0.1 PING=50 SCAN=50", provider);
    collector.start();
    sleep(Duration::from_millis(120)).await;

    timeout(Duration::from_millis(1), collector.terminate())
        .await
        .expect("terminate should be immediate");
    assert_eq!(collector.phase(), CollectorPhase::Stopped);
}
