mod common;

use camrtsp::core::metrics::StreamMetrics;
use camrtsp::core::port_cleanup::{port_is_free, CleanupPolicy, ProcNetOwners};
use camrtsp::core::supervisor::{Supervisor, SupervisorOptions, SupervisorState};
use camrtsp::errors::AppError;
use common::{sh, sh_plan, unused_port};
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

const LISTEN_PORT_ENV: &str = "CAMRTSP_TEST_LISTEN_PORT";

fn options(max_start_attempts: u32) -> SupervisorOptions {
    options_on(unused_port(), max_start_attempts)
}

fn options_on(port: u16, max_start_attempts: u32) -> SupervisorOptions {
    SupervisorOptions {
        port,
        skip_cleanup: false,
        cleanup: CleanupPolicy {
            grace: Duration::from_millis(200),
            timeout: Duration::from_millis(1000),
            poll_interval: Duration::from_millis(50),
        },
        settle: Duration::from_millis(300),
        grace: Duration::from_millis(500),
        poll_interval: Duration::from_millis(50),
        max_start_attempts,
    }
}

fn supervisor(max_start_attempts: u32) -> (Supervisor, Arc<StreamMetrics>) {
    let metrics = Arc::new(StreamMetrics::new().unwrap());
    let sup = Supervisor::new(options(max_start_attempts), metrics.clone(), Box::new(ProcNetOwners::default()));
    (sup, metrics)
}

fn supervisor_on(port: u16) -> Supervisor {
    let metrics = Arc::new(StreamMetrics::new().unwrap());
    Supervisor::new(options_on(port, 3), metrics, Box::new(ProcNetOwners::default()))
}

/// Runs inside the child spawned by `spawn_listener_process`; a no-op otherwise.
#[test]
fn listener_process_main() {
    let Ok(port) = std::env::var(LISTEN_PORT_ENV) else { return };
    let _listener = std::net::TcpListener::bind(("0.0.0.0", port.parse::<u16>().unwrap())).unwrap();
    std::thread::sleep(Duration::from_secs(60));
}

/// Re-runs this test binary as a separate process that listens on `port`.
fn spawn_listener_process(port: u16) -> Child {
    let child = Command::new(std::env::current_exe().unwrap())
        .args(["listener_process_main", "--exact", "--nocapture", "--test-threads=1"])
        .env(LISTEN_PORT_ENV, port.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    let deadline = Instant::now() + Duration::from_secs(10);
    while port_is_free(port) {
        assert!(Instant::now() < deadline, "listener process never bound port {}", port);
        std::thread::sleep(Duration::from_millis(50));
    }
    child
}

fn wait_for_exit(child: &mut Child, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if child.try_wait().unwrap().is_some() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    false
}

const CRASH: &str = "echo 'device busy' >&2; exit 3";
const SERVE: &str = "sleep 30";

#[tokio::test]
async fn crash_on_start_falls_back_then_stops_cleanly() {
    let (mut sup, metrics) = supervisor(3);
    sup.clean_port().await.unwrap();
    let plans = vec![sh_plan("vaapih264enc", CRASH), sh_plan("x264enc", SERVE)];

    let running = sup.start(&plans).await.unwrap().unwrap();
    assert_eq!(running.plan.encoder.name(), "x264enc");
    assert_eq!(sup.state(), SupervisorState::Running);
    assert_eq!(metrics.encoder_fallbacks(), 1);
    assert_eq!(metrics.server_starts(), 2);
    assert_eq!(metrics.server_up.get(), 1);

    sup.supervise(running, tokio::time::sleep(Duration::from_millis(200))).await.unwrap();
    assert_eq!(
        sup.history(),
        &[
            SupervisorState::Idle,
            SupervisorState::Cleaning,
            SupervisorState::Starting,
            SupervisorState::Running,
            SupervisorState::Stopping,
            SupervisorState::Stopped,
        ]
    );
    assert_eq!(metrics.server_up.get(), 0);
}

#[tokio::test]
async fn exhausted_chain_fails_with_attempt_count() {
    let (mut sup, _) = supervisor(3);
    let plans = vec![sh_plan("a", CRASH), sh_plan("b", CRASH)];
    match sup.start(&plans).await {
        Err(AppError::ProcessCrashOnStart { attempts, status, .. }) => {
            assert_eq!(attempts, 2);
            assert!(status.contains("exit status: 3"));
        }
        other => panic!("unexpected {:?}", other.map(|_| ())),
    }
    assert_eq!(sup.state(), SupervisorState::Failed);
}

#[tokio::test]
async fn attempt_limit_bounds_the_fallback_walk() {
    let (mut sup, metrics) = supervisor(1);
    let plans = vec![sh_plan("a", CRASH), sh_plan("b", SERVE)];
    let err = sup.start(&plans).await.err().expect("start must fail");
    assert!(matches!(err, AppError::ProcessCrashOnStart { attempts: 1, .. }));
    assert_eq!(err.exit_code(), 6);
    assert_eq!(metrics.encoder_fallbacks(), 0);
}

#[tokio::test]
async fn child_exit_while_running_is_a_failure() {
    let (mut sup, _) = supervisor(3);
    let plans = vec![sh_plan("x264enc", "sleep 1")];
    let running = sup.start(&plans).await.unwrap().unwrap();

    let err = sup.supervise(running, std::future::pending::<()>()).await.unwrap_err();
    assert!(matches!(err, AppError::ProcessExited { .. }));
    assert_eq!(err.exit_code(), 7);
    assert_eq!(sup.state(), SupervisorState::Failed);
}

#[tokio::test]
async fn config_file_is_written_and_pusher_supervised() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("run").join("mediamtx.yml");
    let mut plan = sh_plan("libx264", SERVE);
    plan.pusher = Some(sh(SERVE));
    plan.config_file = Some((config_path.clone(), "rtsp: true\n".to_string()));

    let (mut sup, metrics) = supervisor(3);
    let running = sup.start(&[plan]).await.unwrap().unwrap();
    assert_eq!(running.children.len(), 2);
    assert_eq!(std::fs::read_to_string(&config_path).unwrap(), "rtsp: true\n");
    assert_eq!(metrics.server_starts(), 1);

    sup.supervise(running, async {}).await.unwrap();
    assert_eq!(sup.state(), SupervisorState::Stopped);
}

#[tokio::test]
async fn sigterm_ignoring_child_is_killed_after_grace() {
    let (mut sup, _) = supervisor(3);
    let plans = vec![sh_plan("x264enc", "trap '' TERM; while true; do sleep 1; done")];
    let running = sup.start(&plans).await.unwrap().unwrap();
    let started = std::time::Instant::now();
    sup.supervise(running, async {}).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert_eq!(sup.state(), SupervisorState::Stopped);
}

#[tokio::test]
async fn cleanup_terminates_real_listener_process() {
    let port = unused_port();
    let mut listener = spawn_listener_process(port);

    let mut sup = supervisor_on(port);
    sup.clean_port().await.unwrap();
    assert_eq!(sup.state(), SupervisorState::Cleaning);
    assert!(port_is_free(port));
    assert!(wait_for_exit(&mut listener, Duration::from_secs(5)));
}

#[tokio::test]
async fn unreleasable_port_fails_cleanup() {
    // our own listener: owners never report this process, so nothing can free it
    let held = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
    let port = held.local_addr().unwrap().port();

    let mut sup = supervisor_on(port);
    let err = sup.clean_port().await.unwrap_err();
    assert!(matches!(err, AppError::PortBusyTimeout { port: p, .. } if p == port));
    assert_eq!(err.exit_code(), 5);
    assert_eq!(sup.state(), SupervisorState::Failed);
    drop(held);
}

#[tokio::test]
async fn stop_during_settle_stops_spawned_children() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("server.pid");
    let script = format!("echo $$ > {}; exec sleep 30", pid_file.display());
    let (stop_tx, stop_rx) = watch::channel(false);
    let metrics = Arc::new(StreamMetrics::new().unwrap());
    let mut opts = options(3);
    opts.settle = Duration::from_secs(5);
    let mut sup = Supervisor::new(opts, metrics, Box::new(ProcNetOwners::default())).with_stop(stop_rx);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        let _ = stop_tx.send(true);
    });
    let started = Instant::now();
    let running = sup.start(&[sh_plan("x264enc", &script)]).await.unwrap();
    assert!(running.is_none());
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(
        sup.history(),
        &[SupervisorState::Idle, SupervisorState::Starting, SupervisorState::Stopping, SupervisorState::Stopped]
    );

    let pid: i32 = std::fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
    assert!(kill(Pid::from_raw(pid), None).is_err(), "server pid {} still alive", pid);
}

#[tokio::test]
async fn stop_already_requested_spawns_nothing() {
    let (stop_tx, stop_rx) = watch::channel(false);
    stop_tx.send(true).unwrap();
    let metrics = Arc::new(StreamMetrics::new().unwrap());
    let mut sup = Supervisor::new(options(3), metrics.clone(), Box::new(ProcNetOwners::default())).with_stop(stop_rx);
    assert!(sup.start(&[sh_plan("x264enc", SERVE)]).await.unwrap().is_none());
    assert_eq!(metrics.server_starts(), 0);
    assert_eq!(sup.state(), SupervisorState::Stopped);
}

#[tokio::test]
async fn missing_server_binary_is_a_missing_dependency() {
    let (mut sup, _) = supervisor(3);
    let mut plan = sh_plan("x264enc", SERVE);
    plan.server.program = "/nonexistent/gst-rtsp-launch".to_string();
    let err = sup.start(&[plan, sh_plan("libx264", SERVE)]).await.err().expect("start must fail");
    assert!(matches!(err, AppError::MissingDependency { .. }));
    assert_eq!(err.exit_code(), 3);
    assert_eq!(sup.state(), SupervisorState::Failed);
}

#[tokio::test]
async fn unwritable_config_file_fails_start() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "").unwrap();
    let mut plan = sh_plan("libx264", SERVE);
    plan.config_file = Some((blocker.join("mediamtx.yml"), "rtsp: true\n".to_string()));

    let (mut sup, metrics) = supervisor(3);
    let err = sup.start(&[plan]).await.err().expect("start must fail");
    assert!(matches!(err, AppError::Io(_)));
    assert_eq!(sup.state(), SupervisorState::Failed);
    assert_eq!(metrics.server_starts(), 0);
}
