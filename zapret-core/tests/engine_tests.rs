//! End-to-end engine test: preset catalogue, scan loop, and the live
//! prober wired together against local HTTP endpoints.
#![cfg(unix)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use zapret_core::engine::{
    ConnectivityProber, Orchestrator, ProbeConfig, ProbeTarget, ScanConfig, ScanOutcome,
};
use zapret_core::engine::MonitorConfig;
use zapret_core::{EventBus, PresetStore, ProcessSupervisor, UiEvent};

fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .is_test(true)
        .try_init();
}

/// Local endpoint that starves the first `starved_requests` requests (UNSUP
/// style: healthy status, tiny body) and serves a real body afterwards
async fn spawn_flaky_endpoint(starved_requests: usize) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let served = Arc::new(AtomicUsize::new(0));

    tokio::spawn(async move {
        loop {
            let (mut socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let served = Arc::clone(&served);
            tokio::spawn(async move {
                let mut request = [0u8; 2048];
                let _ = socket.read(&mut request).await;

                let n = served.fetch_add(1, Ordering::SeqCst);
                let body_len = if n < starved_requests { 40 } else { 600 };
                let body = vec![b'x'; body_len];
                let header = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body_len
                );
                let _ = socket.write_all(header.as_bytes()).await;
                let _ = socket.write_all(&body).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

const GENERAL_BAT: &str = concat!(
    "@echo off\n",
    "start \"zapret: general\" /min \"%BIN%winws.exe\" --wf-tcp=80,443 ^\n",
    "--hostlist=\"%LISTS%list-general.txt\" --dpi-desync=fake\n",
);

const ALT_BAT: &str = concat!(
    "@echo off\n",
    "start \"zapret: alt\" /min \"%BIN%winws.exe\" --wf-tcp=443 --dpi-desync=split2\n",
);

#[tokio::test]
async fn scan_walks_real_presets_until_the_probe_passes() {
    init_logging();

    // Project root with two strategy launchers; sorted order puts the
    // alt preset first
    let project = tempfile::tempdir().unwrap();
    std::fs::write(project.path().join("general.bat"), GENERAL_BAT).unwrap();
    std::fs::write(project.path().join("general-alt.bat"), ALT_BAT).unwrap();

    let store = PresetStore::new(project.path());
    let catalogue = store.scan();
    assert_eq!(catalogue.len(), 2);
    assert_eq!(catalogue[0].id, "general-alt.bat");
    assert_eq!(catalogue[1].id, "general.bat");
    assert_eq!(
        catalogue[1].args,
        vec![
            "--wf-tcp=80,443",
            "--hostlist=lists/list-general.txt",
            "--dpi-desync=fake",
        ]
    );

    // Two critical targets on one endpoint that fails the first probe round
    // (both requests starved) and passes the second
    let events = EventBus::new();
    let mut rx = events.subscribe();
    let endpoint = spawn_flaky_endpoint(2).await;
    let prober = ConnectivityProber::new(
        vec![
            ProbeTarget::new("alpha", &format!("http://{}/alpha", endpoint), true),
            ProbeTarget::new("beta", &format!("http://{}/beta", endpoint), true),
        ],
        ProbeConfig {
            timeout: Duration::from_secs(5),
            ..ProbeConfig::default()
        },
        events.clone(),
    );
    let supervisor = Arc::new(ProcessSupervisor::new("/bin/sleep", events.clone()));
    let orchestrator = Orchestrator::with_configs(
        supervisor,
        Arc::new(prober),
        events,
        ScanConfig {
            settle_wait: Duration::from_millis(50),
            settle_poll: Duration::from_millis(10),
            retry_pause: Duration::from_millis(20),
        },
        MonitorConfig {
            interval: Duration::from_secs(3600),
            ..MonitorConfig::default()
        },
    );
    orchestrator.set_catalogue(catalogue);

    let outcome = orchestrator.run_scan().await;
    let winner = match outcome {
        ScanOutcome::Selected(preset) => preset,
        other => panic!("expected a selected strategy, got {:?}", other),
    };

    assert_eq!(winner.id, "general.bat");
    assert!(orchestrator.is_running());
    assert!(!orchestrator.is_scanning());
    assert_eq!(orchestrator.selected().unwrap().id, "general.bat");

    // The log tells the whole story: first candidate tested and failed,
    // second tested and kept
    let mut lines = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let UiEvent::Log(line) = event {
            lines.push(line);
        }
    }
    let joined = lines.join("\n");
    assert!(joined.contains("--- Testing: General Alt ---"));
    assert!(joined.contains("UNSUP"));
    assert!(joined.contains("--- Testing: General ---"));
    assert!(joined.contains("SUCCESS! Working strategy: General"));

    orchestrator.stop().await.unwrap();
}
