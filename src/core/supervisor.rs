use crate::common::file_utils::ensure_directory;
use crate::core::metrics::StreamMetrics;
use crate::core::pipeline_builder::{LaunchPlan, ProcessSpec};
use crate::core::port_cleanup::{free_port, CleanupPolicy, PortOwners};
use crate::errors::AppError;
use log::{debug, error, info, warn};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;

const LOG_TAIL_LINES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SupervisorState {
    Idle,
    Cleaning,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub port: u16,
    pub skip_cleanup: bool,
    pub cleanup: CleanupPolicy,
    pub settle: Duration,
    pub grace: Duration,
    pub poll_interval: Duration,
    pub max_start_attempts: u32,
}

/// A spawned child plus the tail of its output.
pub struct ManagedChild {
    pub program: String,
    child: Child,
    tail: Arc<Mutex<VecDeque<String>>>,
}

impl ManagedChild {
    fn exit_status(&mut self) -> Option<String> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.to_string()),
            Ok(None) => None,
            Err(e) => Some(format!("wait failed: {}", e)),
        }
    }

    fn tail(&self) -> String {
        self.tail
            .lock()
            .map(|t| t.iter().cloned().collect::<Vec<_>>().join(" | "))
            .unwrap_or_default()
    }

    /// SIGTERM, wait up to `grace`, then SIGKILL.
    async fn terminate(&mut self, grace: Duration) {
        if self.exit_status().is_some() {
            return;
        }
        if let Some(pid) = self.child.id() {
            debug!("Sending SIGTERM to {} (pid {})", self.program, pid);
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }
        let start = Instant::now();
        while start.elapsed() < grace {
            if self.exit_status().is_some() {
                info!("{} stopped after {:?}", self.program, start.elapsed());
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        warn!("{} did not stop within {:?}; killing", self.program, grace);
        if let Err(e) = self.child.kill().await {
            warn!("Failed to kill {}: {}", self.program, e);
        }
    }
}

async fn forward_output<R: AsyncRead + Unpin>(name: String, reader: R, tail: Arc<Mutex<VecDeque<String>>>) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                info!("[{}] {}", name, line);
                if let Ok(mut t) = tail.lock() {
                    if t.len() == LOG_TAIL_LINES {
                        t.pop_front();
                    }
                    t.push_back(line);
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("[{}] Error reading output: {}", name, e);
                break;
            }
        }
    }
}

fn spawn_process(process: &ProcessSpec) -> Result<ManagedChild, AppError> {
    info!("🚀 Starting: {}", process.command_line());
    let mut child = Command::new(&process.program)
        .args(&process.args)
        .envs(&process.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => AppError::MissingDependency {
                binary: process.program.clone(),
                purpose: "spawn".to_string(),
            },
            _ => AppError::Io(format!("Failed to start {}: {}", process.program, e)),
        })?;

    let name = std::path::Path::new(&process.program)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| process.program.clone());
    let tail = Arc::new(Mutex::new(VecDeque::with_capacity(LOG_TAIL_LINES)));
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_output(name.clone(), stdout, tail.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_output(name.clone(), stderr, tail.clone()));
    }
    info!("{} started with PID {:?}", name, child.id());
    Ok(ManagedChild { program: name, child, tail })
}

/// Resolves once `stop` flips to true; never if its sender is gone first.
pub async fn wait_for_stop(stop: &mut watch::Receiver<bool>) {
    let requested = stop.wait_for(|requested| *requested).await.is_ok();
    if !requested {
        std::future::pending::<()>().await
    }
}

async fn wait_for_optional_stop(stop: &mut Option<watch::Receiver<bool>>) {
    match stop {
        Some(rx) => wait_for_stop(rx).await,
        None => std::future::pending::<()>().await,
    }
}

enum PlanAttempt {
    Started(Vec<ManagedChild>),
    Crashed { program: String, status: String },
    Interrupted(Vec<ManagedChild>),
}

/// Children of the plan that reached Running, in spawn order.
pub struct RunningSet {
    pub plan: LaunchPlan,
    pub children: Vec<ManagedChild>,
}

/// Drives Idle → Cleaning → Starting → Running → Stopping → Stopped, with
/// Failed reachable from Cleaning, Starting and Running.
pub struct Supervisor {
    options: SupervisorOptions,
    metrics: Arc<StreamMetrics>,
    owners: Box<dyn PortOwners>,
    stop: Option<watch::Receiver<bool>>,
    state: SupervisorState,
    history: Vec<SupervisorState>,
}

impl Supervisor {
    pub fn new(options: SupervisorOptions, metrics: Arc<StreamMetrics>, owners: Box<dyn PortOwners>) -> Self {
        Supervisor {
            options,
            metrics,
            owners,
            stop: None,
            state: SupervisorState::Idle,
            history: vec![SupervisorState::Idle],
        }
    }

    /// Lets `start` abandon the settle wait and stop what it spawned once
    /// `stop` flips to true.
    pub fn with_stop(mut self, stop: watch::Receiver<bool>) -> Self {
        self.stop = Some(stop);
        self
    }

    fn stop_is_requested(&self) -> bool {
        self.stop.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Every state entered so far, starting with Idle.
    pub fn history(&self) -> &[SupervisorState] {
        &self.history
    }

    fn transition(&mut self, next: SupervisorState) {
        debug!("Supervisor: {} -> {}", self.state, next);
        self.state = next;
        self.history.push(next);
    }

    /// Stop requested before anything reached Running.
    pub fn stop_before_running(&mut self) {
        info!("Stop requested before the server was running");
        self.transition(SupervisorState::Stopping);
        self.transition(SupervisorState::Stopped);
    }

    /// Frees the RTSP port unless cleanup is skipped.
    pub async fn clean_port(&mut self) -> Result<(), AppError> {
        self.transition(SupervisorState::Cleaning);
        if self.options.skip_cleanup {
            info!("Skipping port cleanup for {}", self.options.port);
            return Ok(());
        }
        match free_port(self.options.port, self.owners.as_ref(), self.options.cleanup).await {
            Ok(report) => {
                if !report.terminated.is_empty() || !report.killed.is_empty() {
                    info!(
                        "🧹 Port {} cleaned (terminated {:?}, killed {:?})",
                        self.options.port, report.terminated, report.killed
                    );
                }
                Ok(())
            }
            Err(e) => {
                self.transition(SupervisorState::Failed);
                Err(e)
            }
        }
    }

    async fn stop_all(children: &mut [ManagedChild], grace: Duration) {
        // pusher before server
        for child in children.iter_mut().rev() {
            child.terminate(grace).await;
        }
    }

    async fn try_plan(&mut self, plan: &LaunchPlan) -> Result<PlanAttempt, AppError> {
        let mut stop = self.stop.clone();
        let mut children = Vec::new();
        let mut processes = vec![&plan.server];
        if let Some(pusher) = &plan.pusher {
            processes.push(pusher);
        }
        for (idx, process) in processes.into_iter().enumerate() {
            let child = match spawn_process(process) {
                Ok(c) => c,
                Err(e) => {
                    Self::stop_all(&mut children, self.options.grace).await;
                    if matches!(e, AppError::MissingDependency { .. }) {
                        return Err(e);
                    }
                    return Ok(PlanAttempt::Crashed { program: process.program.clone(), status: e.to_string() });
                }
            };
            if idx == 0 {
                self.metrics.record_server_start();
            }
            children.push(child);
            tokio::select! {
                _ = tokio::time::sleep(self.options.settle) => {}
                _ = wait_for_optional_stop(&mut stop) => return Ok(PlanAttempt::Interrupted(children)),
            }
            for c in children.iter_mut() {
                if let Some(status) = c.exit_status() {
                    let program = c.program.clone();
                    let tail = c.tail();
                    let status = if tail.is_empty() { status } else { format!("{}: {}", status, tail) };
                    Self::stop_all(&mut children, self.options.grace).await;
                    return Ok(PlanAttempt::Crashed { program, status });
                }
            }
        }
        Ok(PlanAttempt::Started(children))
    }

    /// Starts the first plan whose processes survive the settle delay,
    /// falling back through `plans` up to the attempt limit. `None` means a
    /// stop was requested first and everything spawned has been stopped.
    pub async fn start(&mut self, plans: &[LaunchPlan]) -> Result<Option<RunningSet>, AppError> {
        self.transition(SupervisorState::Starting);
        let max_attempts = self.options.max_start_attempts.max(1) as usize;
        let mut last = (String::from("none"), String::from("no launch plan"));
        let mut attempts = 0u32;

        for (idx, plan) in plans.iter().take(max_attempts).enumerate() {
            if self.stop_is_requested() {
                self.stop_before_running();
                return Ok(None);
            }
            if idx > 0 {
                self.metrics.record_encoder_fallback();
                warn!("Falling back to encoder {}", plan.encoder);
            }
            if let Err(e) = Self::write_config_file(plan) {
                self.transition(SupervisorState::Failed);
                return Err(e);
            }
            attempts += 1;
            let start_time = Instant::now();
            match self.try_plan(plan).await {
                Ok(PlanAttempt::Started(children)) => {
                    info!("✅ Encoder {} running ({:?})", plan.encoder, start_time.elapsed());
                    self.metrics.set_server_up(true);
                    self.transition(SupervisorState::Running);
                    return Ok(Some(RunningSet { plan: plan.clone(), children }));
                }
                Ok(PlanAttempt::Crashed { program, status }) => {
                    error!("{} exited during startup with encoder {}: {}", program, plan.encoder, status);
                    last = (program, status);
                }
                Ok(PlanAttempt::Interrupted(mut children)) => {
                    info!("Stop requested while starting encoder {}", plan.encoder);
                    self.transition(SupervisorState::Stopping);
                    Self::stop_all(&mut children, self.options.grace).await;
                    self.transition(SupervisorState::Stopped);
                    return Ok(None);
                }
                Err(e) => {
                    self.transition(SupervisorState::Failed);
                    return Err(e);
                }
            }
        }

        self.transition(SupervisorState::Failed);
        Err(AppError::ProcessCrashOnStart { program: last.0, status: last.1, attempts })
    }

    fn write_config_file(plan: &LaunchPlan) -> Result<(), AppError> {
        if let Some((path, contents)) = &plan.config_file {
            if let Some(parent) = path.parent() {
                ensure_directory(parent)?;
            }
            std::fs::write(path, contents)
                .map_err(|e| AppError::Io(format!("Failed to write {}: {}", path.display(), e)))?;
            debug!("Wrote {}", path.display());
        }
        Ok(())
    }

    /// Polls the children until `shutdown` resolves or one of them exits.
    pub async fn supervise<F>(&mut self, mut running: RunningSet, shutdown: F) -> Result<(), AppError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let exited = loop {
            tokio::select! {
                _ = &mut shutdown => break None,
                _ = tokio::time::sleep(self.options.poll_interval) => {
                    let dead = running
                        .children
                        .iter_mut()
                        .find_map(|c| c.exit_status().map(|status| (c.program.clone(), status)));
                    if dead.is_some() {
                        break dead;
                    }
                }
            }
        };

        self.metrics.set_server_up(false);
        match exited {
            None => {
                info!("Stop requested; shutting down");
                self.transition(SupervisorState::Stopping);
                Self::stop_all(&mut running.children, self.options.grace).await;
                self.transition(SupervisorState::Stopped);
                info!("⏹ Stopped");
                Ok(())
            }
            Some((program, status)) => {
                error!("{} exited while running ({})", program, status);
                Self::stop_all(&mut running.children, self.options.grace).await;
                self.transition(SupervisorState::Failed);
                Err(AppError::ProcessExited { program, status })
            }
        }
    }
}
