//! Units as managed child processes

use crate::runtime::adapter::{DeployAdapter, DeployError, DeployRequest, InstanceId};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch, Mutex};

/// Environment variable carrying the unit id
pub const UNIT_ID_ENV: &str = "DEPLOYER_UNIT_ID";

/// Environment variable carrying the merged unit config as JSON
pub const UNIT_CONFIG_ENV: &str = "DEPLOYER_UNIT_CONFIG";

/// Process status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Process is pending start
    Pending,
    /// Process is running
    Running,
    /// Process has stopped with exit code
    Stopped(Option<i32>),
    /// Process failed to start
    Failed,
}

impl ProcessStatus {
    /// Check if process is running
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessStatus::Running)
    }

    /// Check if process has stopped
    pub fn is_stopped(&self) -> bool {
        matches!(self, ProcessStatus::Stopped(_) | ProcessStatus::Failed)
    }
}

/// Configuration for spawning a unit process
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessConfig {
    /// Unit id (for logging)
    pub name: String,
    /// Executable path
    pub executable: String,
    /// Command line arguments
    pub args: Vec<String>,
    /// Environment variables
    pub env: HashMap<String, String>,
    /// Working directory
    pub working_dir: Option<PathBuf>,
    /// How long the process must stay up to count as started
    pub ready_after: Duration,
}

impl ProcessConfig {
    /// Build a process configuration from a deploy request.
    ///
    /// Recognised options: `args` (list), `env` (object), `working_dir`
    /// (string) and `ready_after_ms` (integer). Other options are ignored.
    pub fn from_request(request: &DeployRequest) -> Result<Self, DeployError> {
        let options = &request.options;

        let args = match options.get("args") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    scalar_to_string(item).ok_or_else(|| invalid("args", "expected scalar items"))
                })
                .collect::<Result<_, _>>()?,
            Some(_) => return Err(invalid("args", "expected a list")),
        };

        let mut env = HashMap::new();
        match options.get("env") {
            None | Some(Value::Null) => {}
            Some(Value::Object(vars)) => {
                for (key, value) in vars {
                    let value = scalar_to_string(value)
                        .ok_or_else(|| invalid("env", "expected scalar values"))?;
                    env.insert(key.clone(), value);
                }
            }
            Some(_) => return Err(invalid("env", "expected an object")),
        }
        env.insert(UNIT_ID_ENV.to_string(), request.unit_id.clone());
        env.insert(
            UNIT_CONFIG_ENV.to_string(),
            Value::Object(request.config.clone()).to_string(),
        );

        let working_dir = match options.get("working_dir") {
            None | Some(Value::Null) => None,
            Some(Value::String(dir)) => Some(PathBuf::from(dir)),
            Some(_) => return Err(invalid("working_dir", "expected a string")),
        };

        let ready_after = match options.get("ready_after_ms") {
            None | Some(Value::Null) => Duration::ZERO,
            Some(value) => Duration::from_millis(
                value
                    .as_u64()
                    .ok_or_else(|| invalid("ready_after_ms", "expected a non-negative integer"))?,
            ),
        };

        Ok(Self {
            name: request.unit_id.clone(),
            executable: request.type_name.clone(),
            args,
            env,
            working_dir,
            ready_after,
        })
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn invalid(option: &str, reason: &str) -> DeployError {
    DeployError::InvalidOption {
        option: option.to_string(),
        reason: reason.to_string(),
    }
}

/// Event emitted by a managed process
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    /// Process started
    Started { pid: u32 },
    /// Process output line (stdout or stderr)
    Output { line: String, is_stderr: bool },
    /// Process exited
    Exited { code: Option<i32> },
    /// Process failed to start
    Failed { error: String },
}

/// A managed child process
pub struct ManagedProcess {
    /// Process configuration
    pub config: ProcessConfig,
    /// Current status
    pub status: ProcessStatus,
    /// Process ID (if running)
    pub pid: Option<u32>,
    /// Child process handle
    child: Option<Child>,
    /// Event sender
    event_tx: Option<mpsc::UnboundedSender<(String, ProcessEvent)>>,
}

impl ManagedProcess {
    /// Create a new managed process
    pub fn new(config: ProcessConfig) -> Self {
        Self {
            config,
            status: ProcessStatus::Pending,
            pid: None,
            child: None,
            event_tx: None,
        }
    }

    /// Set the event sender for this process
    pub fn with_event_sender(mut self, tx: mpsc::UnboundedSender<(String, ProcessEvent)>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn emit(&self, event: ProcessEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send((self.config.name.clone(), event));
        }
    }

    /// Spawn the process
    pub async fn start(&mut self) -> Result<u32, ProcessError> {
        if self.status.is_running() {
            return Err(ProcessError::AlreadyRunning(self.config.name.clone()));
        }

        log::info!(
            "[{}] Starting: {} {}",
            self.config.name,
            self.config.executable,
            self.config.args.join(" ")
        );

        let mut cmd = Command::new(&self.config.executable);
        cmd.args(&self.config.args)
            .envs(&self.config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.status = ProcessStatus::Failed;
                self.emit(ProcessEvent::Failed {
                    error: format!("Failed to spawn process: {}", e),
                });
                return Err(ProcessError::SpawnFailed {
                    name: self.config.name.clone(),
                    source: e,
                });
            }
        };

        let pid = child.id().unwrap_or(0);
        self.pid = Some(pid);
        self.status = ProcessStatus::Running;
        self.emit(ProcessEvent::Started { pid });

        if let Some(tx) = self.event_tx.clone() {
            if let Some(stdout) = child.stdout.take() {
                forward_lines(self.config.name.clone(), stdout, false, tx.clone());
            }
            if let Some(stderr) = child.stderr.take() {
                forward_lines(self.config.name.clone(), stderr, true, tx);
            }
        }

        self.child = Some(child);
        Ok(pid)
    }

    /// Stop the process gracefully (SIGTERM, then SIGKILL after the grace period)
    pub async fn stop(&mut self, grace: Duration) -> Result<(), ProcessError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        log::info!("[{}] Stopping process...", self.config.name);

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = self.pid {
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            }
        }

        #[cfg(not(unix))]
        {
            let _ = child.start_kill();
        }

        let code = match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => status.code(),
            Ok(Err(e)) => {
                log::error!("[{}] Error waiting for process: {}", self.config.name, e);
                None
            }
            Err(_) => {
                log::warn!(
                    "[{}] Process did not exit within {}ms, forcing kill",
                    self.config.name,
                    grace.as_millis()
                );
                child.kill().await.map_err(|e| ProcessError::KillFailed {
                    name: self.config.name.clone(),
                    source: e,
                })?;
                None
            }
        };

        log::info!("[{}] Process exited with code: {:?}", self.config.name, code);
        self.status = ProcessStatus::Stopped(code);
        self.pid = None;
        self.emit(ProcessEvent::Exited { code });
        Ok(())
    }

    /// Check if the process is still running
    pub async fn check_status(&mut self) -> ProcessStatus {
        if let Some(child) = &mut self.child {
            match child.try_wait() {
                Ok(Some(status)) => {
                    let code = status.code();
                    self.status = ProcessStatus::Stopped(code);
                    self.pid = None;
                    self.child = None;
                    self.emit(ProcessEvent::Exited { code });
                }
                Ok(None) => {}
                Err(e) => {
                    log::error!(
                        "[{}] Error checking process status: {}",
                        self.config.name,
                        e
                    );
                }
            }
        }

        self.status
    }
}

fn forward_lines<R>(
    name: String,
    reader: R,
    is_stderr: bool,
    tx: mpsc::UnboundedSender<(String, ProcessEvent)>,
) where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let _ = tx.send((name.clone(), ProcessEvent::Output { line, is_stderr }));
        }
    });
}

/// Spawned processes in start order
#[derive(Default)]
struct ProcessTable {
    processes: Vec<ManagedProcess>,
    /// Set by shutdown; no process is spawned afterwards
    closed: bool,
}

/// Deploy adapter starting each unit as a child process.
///
/// The unit's `name` is the executable. A process is registered as soon as it
/// is spawned, before its readiness delay, so [`ProcessAdapter::shutdown`]
/// stops it even if its deploy is still in flight. After shutdown every
/// deploy is refused.
pub struct ProcessAdapter {
    table: Mutex<ProcessTable>,
    event_tx: mpsc::UnboundedSender<(String, ProcessEvent)>,
    event_rx: Mutex<mpsc::UnboundedReceiver<(String, ProcessEvent)>>,
}

impl Default for ProcessAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessAdapter {
    /// Create an adapter with no started processes
    pub fn new() -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            table: Mutex::new(ProcessTable::default()),
            event_tx,
            event_rx: Mutex::new(event_rx),
        }
    }

    /// Status of every started process, in start order
    pub async fn status(&self) -> Vec<(String, ProcessStatus)> {
        let mut table = self.table.lock().await;
        let mut statuses = Vec::with_capacity(table.processes.len());
        for process in table.processes.iter_mut() {
            let status = process.check_status().await;
            statuses.push((process.config.name.clone(), status));
        }
        statuses
    }

    /// Forward process events to the log until shutdown or all processes exit
    pub async fn wait(&self, mut shutdown_rx: watch::Receiver<()>) {
        let mut event_rx = self.event_rx.lock().await;
        let mut liveness = tokio::time::interval(Duration::from_secs(1));
        liveness.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    log::info!("Shutdown signal received");
                    break;
                }

                event = event_rx.recv() => {
                    if let Some((name, event)) = event {
                        log_event(&name, event);
                    }
                }

                _ = liveness.tick() => {
                    let statuses = self.status().await;
                    if statuses.iter().all(|(_, status)| !status.is_running()) {
                        log::info!("All unit processes have stopped");
                        break;
                    }
                }
            }
        }
    }

    /// Stop all started processes in reverse start order
    pub async fn shutdown(&self, grace: Duration) {
        let mut table = self.table.lock().await;
        table.closed = true;
        if table.processes.is_empty() {
            return;
        }
        log::info!("Stopping {} unit process(es)...", table.processes.len());

        for process in table.processes.iter_mut().rev() {
            if process.check_status().await.is_running() {
                if let Err(e) = process.stop(grace).await {
                    log::error!("[{}] Error stopping process: {}", process.config.name, e);
                }
            }
        }

        log::info!("All unit processes stopped");
    }
}

fn log_event(name: &str, event: ProcessEvent) {
    match event {
        ProcessEvent::Output { line, is_stderr } => {
            if is_stderr {
                log::warn!("[{}] {}", name, line);
            } else {
                log::info!("[{}] {}", name, line);
            }
        }
        ProcessEvent::Exited { code } => {
            log::info!("[{}] Process exited with code: {:?}", name, code);
        }
        ProcessEvent::Failed { error } => {
            log::error!("[{}] Process failed: {}", name, error);
        }
        ProcessEvent::Started { pid } => {
            log::info!("[{}] Process started with PID: {}", name, pid);
        }
    }
}

#[async_trait]
impl DeployAdapter for ProcessAdapter {
    async fn deploy(&self, request: DeployRequest) -> Result<InstanceId, DeployError> {
        let config = ProcessConfig::from_request(&request)?;
        let name = config.name.clone();
        let ready_after = config.ready_after;

        let pid = {
            let mut table = self.table.lock().await;
            if table.closed {
                return Err(ProcessError::ShuttingDown(name).into());
            }
            let mut process =
                ManagedProcess::new(config).with_event_sender(self.event_tx.clone());
            let pid = process.start().await?;
            table.processes.push(process);
            pid
        };

        if !ready_after.is_zero() {
            tokio::time::sleep(ready_after).await;

            let mut table = self.table.lock().await;
            if table.closed {
                return Err(ProcessError::ShuttingDown(name).into());
            }
            if let Some(index) = table.processes.iter().position(|p| p.config.name == name) {
                if let ProcessStatus::Stopped(code) = table.processes[index].check_status().await {
                    table.processes.remove(index);
                    return Err(ProcessError::ExitedDuringStartup { name, code }.into());
                }
            }
        }

        Ok(InstanceId(format!("{}@{}", request.unit_id, pid)))
    }
}

/// Errors that can occur with managed processes
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Process '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Failed to spawn process '{name}': {source}")]
    SpawnFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process '{name}' exited during startup with code {code:?}")]
    ExitedDuringStartup { name: String, code: Option<i32> },

    #[error("Not starting '{0}': unit processes are shutting down")]
    ShuttingDown(String),

    #[error("Failed to kill process '{name}': {source}")]
    KillFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },
}
