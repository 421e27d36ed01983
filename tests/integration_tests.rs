//! Integration tests for stopgap.
//!
//! These drive the real event loop; timing-sensitive tests run on tokio's
//! paused clock so grace periods elapse instantly and deterministically.

use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use stopgap::config::ShutdownConfig;
use stopgap::engine::Task;
use stopgap::shutdown::{
    Notification, NotificationHandler, ShutdownState, SignalSource, StopReason,
};
use stopgap::{EventEngine, EventLoop, ShutdownCoordinator, ShutdownError};

/// Signal source that tests fire by hand.
#[derive(Clone, Default)]
struct ManualSignals {
    handlers: Arc<Mutex<Vec<NotificationHandler>>>,
}

impl ManualSignals {
    fn deliver(&self, kind: Notification) {
        let handlers = self.handlers.lock().clone();
        for handler in handlers {
            handler(kind);
        }
    }
}

impl SignalSource for ManualSignals {
    fn register(&self, handler: NotificationHandler) -> io::Result<()> {
        self.handlers.lock().push(handler);
        Ok(())
    }
}

/// Event loop wrapper counting stop requests.
struct CountingEngine {
    inner: EventLoop,
    stops: AtomicUsize,
}

impl EventEngine for CountingEngine {
    fn add_callback(&self, task: Task) {
        self.inner.add_callback(task);
    }

    fn call_later(&self, delay: Duration, task: Task) {
        self.inner.call_later(delay, task);
    }

    fn is_busy(&self) -> bool {
        self.inner.is_busy()
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.inner.stop();
    }
}

struct Harness {
    event_loop: EventLoop,
    engine: Arc<CountingEngine>,
    coordinator: Arc<ShutdownCoordinator>,
    signals: ManualSignals,
}

impl Harness {
    fn new(max_wait: Duration) -> Self {
        let event_loop = EventLoop::new();
        let engine = Arc::new(CountingEngine {
            inner: event_loop.clone(),
            stops: AtomicUsize::new(0),
        });
        let signals = ManualSignals::default();
        let config = ShutdownConfig::default().with_deadline(max_wait);
        let coordinator = Arc::new(
            ShutdownCoordinator::new(engine.clone(), &config)
                .with_signal_source(Box::new(signals.clone())),
        );
        coordinator.install_handlers().expect("install handlers");

        Self {
            event_loop,
            engine,
            coordinator,
            signals,
        }
    }

    /// Keep the loop reporting pending work for the whole test.
    fn keep_busy(&self) {
        self.event_loop
            .call_later(Duration::from_secs(3600), Box::new(|| {}));
    }

    fn stops(&self) -> usize {
        self.engine.stops.load(Ordering::SeqCst)
    }

    /// Run the loop to completion and return how long it ran.
    async fn run(&self) -> Duration {
        let start = Instant::now();
        self.event_loop.run().await.expect("event loop run");
        start.elapsed()
    }
}

#[tokio::test(start_paused = true)]
async fn test_busy_loop_forced_stop_after_grace_period() {
    let harness = Harness::new(Duration::from_secs(2));
    harness.keep_busy();

    let calls = Arc::new(Mutex::new(Vec::new()));
    let failing = Arc::clone(&calls);
    harness
        .coordinator
        .at_shutdown_named("raises", move || {
            failing.lock().push("raises");
            anyhow::bail!("cleanup failed")
        })
        .unwrap();
    let succeeding = Arc::clone(&calls);
    harness
        .coordinator
        .at_shutdown_named("succeeds", move || {
            succeeding.lock().push("succeeds");
            Ok(())
        })
        .unwrap();

    harness.signals.deliver(Notification::Interrupt);
    let elapsed = harness.run().await;

    assert_eq!(*calls.lock(), vec!["raises", "succeeds"]);
    assert_eq!(
        harness.coordinator.stop_reason(),
        Some(StopReason::DeadlineExceeded)
    );
    assert!(elapsed >= Duration::from_secs(2), "stopped early: {elapsed:?}");
    assert!(
        elapsed <= Duration::from_secs(2) + harness.coordinator.poll_interval(),
        "stopped late: {elapsed:?}"
    );
    assert_eq!(harness.stops(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_idle_loop_stops_cleanly_without_waiting() {
    let harness = Harness::new(Duration::from_secs(5));

    harness.signals.deliver(Notification::Terminate);
    let elapsed = harness.run().await;

    assert_eq!(harness.coordinator.state(), ShutdownState::Stopped);
    assert_eq!(harness.coordinator.stop_reason(), Some(StopReason::Idle));
    assert!(elapsed < harness.coordinator.poll_interval());
    assert_eq!(harness.stops(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_work_finishing_inside_grace_period_stops_cleanly() {
    let harness = Harness::new(Duration::from_secs(5));

    let event_loop = harness.event_loop.clone();
    harness
        .coordinator
        .at_shutdown(move || {
            // Simulates an in-flight request finishing shortly after shutdown starts.
            event_loop.call_later(Duration::from_millis(1200), Box::new(|| {}));
            Ok(())
        })
        .unwrap();

    harness.signals.deliver(Notification::Interrupt);
    let elapsed = harness.run().await;

    assert_eq!(harness.coordinator.stop_reason(), Some(StopReason::Idle));
    assert!(elapsed >= Duration::from_millis(1200));
    assert!(elapsed <= Duration::from_millis(1200) + harness.coordinator.poll_interval());
}

#[tokio::test(start_paused = true)]
async fn test_huge_grace_period_still_stops_on_first_signal() {
    let harness = Harness::new(Duration::from_secs(u64::MAX));

    let event_loop = harness.event_loop.clone();
    harness
        .coordinator
        .at_shutdown(move || {
            event_loop.call_later(Duration::from_secs(2), Box::new(|| {}));
            Ok(())
        })
        .unwrap();

    harness.signals.deliver(Notification::Terminate);
    let finished = tokio::time::timeout(Duration::from_secs(3600), harness.run()).await;

    assert!(finished.is_ok(), "event loop never stopped");
    assert_eq!(harness.coordinator.state(), ShutdownState::Stopped);
    assert_eq!(harness.coordinator.stop_reason(), Some(StopReason::Idle));
    assert_eq!(harness.stops(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_second_signal_escalates_to_immediate_stop() {
    let harness = Harness::new(Duration::from_secs(5));
    harness.keep_busy();

    let signals = harness.signals.clone();
    harness.event_loop.call_later(
        Duration::from_secs(1),
        Box::new(move || signals.deliver(Notification::Terminate)),
    );

    harness.signals.deliver(Notification::Interrupt);
    let elapsed = harness.run().await;

    assert_eq!(harness.coordinator.stop_reason(), Some(StopReason::Escalated));
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_secs(5));
    assert_eq!(harness.stops(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_back_to_back_signals_run_callbacks_once() {
    let harness = Harness::new(Duration::from_secs(5));
    harness.keep_busy();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    harness
        .coordinator
        .at_shutdown(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    harness.signals.deliver(Notification::Interrupt);
    harness.signals.deliver(Notification::Terminate);
    harness.run().await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.coordinator.stop_reason(), Some(StopReason::Escalated));
    assert_eq!(harness.stops(), 1);
}

#[tokio::test]
async fn test_signal_from_foreign_thread() {
    let harness = Harness::new(Duration::from_secs(5));

    let signals = harness.signals.clone();
    let thread = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        signals.deliver(Notification::Terminate);
    });

    harness.run().await;
    thread.join().unwrap();

    assert_eq!(harness.coordinator.stop_reason(), Some(StopReason::Idle));
}

#[test]
fn test_at_shutdown_requires_installed_handlers() {
    let engine: Arc<dyn EventEngine> = Arc::new(EventLoop::new());
    let coordinator = ShutdownCoordinator::new(engine, &ShutdownConfig::default());

    for _ in 0..3 {
        assert!(matches!(
            coordinator.at_shutdown(|| Ok(())),
            Err(ShutdownError::HandlersNotInstalled)
        ));
    }
    assert_eq!(coordinator.callback_count(), 0);
}

#[test]
fn test_install_handlers_twice_registers_once() {
    let harness = Harness::new(Duration::from_secs(5));
    harness.coordinator.install_handlers().unwrap();
    assert_eq!(harness.signals.handlers.lock().len(), 1);
}

#[tokio::test]
async fn test_demo_server_stops_accepting_on_shutdown() {
    use stopgap::server::HelloServer;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let harness = Harness::new(Duration::from_secs(5));
    let server = HelloServer::bind("127.0.0.1:0".parse().unwrap(), harness.engine.clone())
        .await
        .unwrap();
    let addr = server.local_addr();
    let served = server.served();

    let stopper = server.stopper();
    harness
        .coordinator
        .at_shutdown_named("http-server-stop", move || {
            stopper.shutdown();
            Ok(())
        })
        .unwrap();
    let server_task = tokio::spawn(server.run());

    let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    client.read_to_string(&mut response).await.unwrap();
    assert!(response.contains("Hello, world"));

    harness.signals.deliver(Notification::Terminate);
    harness.run().await;
    server_task.await.unwrap();

    assert_eq!(served.load(Ordering::Relaxed), 1);
    assert_eq!(harness.coordinator.stop_reason(), Some(StopReason::Idle));
    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
}

#[test]
fn test_config_parsing() {
    use std::io::Write as IoWrite;
    use stopgap::config::load_config;
    use tempfile::NamedTempFile;

    let config_content = r#"
global:
  log_level: warn
  log_format: json

server:
  listen: "127.0.0.1:0"

shutdown:
  poll_interval: 200ms
"#;

    let mut temp_file = NamedTempFile::new().expect("failed to create temp file");
    temp_file
        .write_all(config_content.as_bytes())
        .expect("failed to write config");

    let config = load_config(temp_file.path()).expect("failed to load config");

    assert_eq!(config.global.log_level, "warn");
    assert_eq!(config.server.listen.port(), 0);
    assert_eq!(config.shutdown.poll_interval, Duration::from_millis(200));
}
