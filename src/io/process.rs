//! Process management layer
//!
//! Handles external process lifecycle and stderr draining,
//! completely separate from transport concerns.

use crate::io::transport::{StdioTransport, Transport};
use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

// ============================================================================
// Process State Management
// ============================================================================

/// Process lifecycle states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    /// Process has not been started yet
    NotStarted,
    /// Process is currently running
    Running { pid: u32 },
    /// Process has been stopped (either by us or on its own)
    Stopped,
}

impl ProcessState {
    /// Get the process ID if the process is running
    pub fn pid(&self) -> Option<u32> {
        match self {
            ProcessState::Running { pid } => Some(*pid),
            _ => None,
        }
    }

    /// Check if the process is currently running
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessState::Running { .. })
    }
}

// ============================================================================
// Process Management
// ============================================================================

/// Error types for process management
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Executable not found: {0}")]
    NotFound(String),

    #[error("Process not started")]
    NotStarted,

    #[error("Process already started")]
    AlreadyStarted,

    #[error("Stdin not available")]
    StdinNotAvailable,

    #[error("Stdout not available")]
    StdoutNotAvailable,

    #[error("Stderr not available")]
    StderrNotAvailable,
}

/// Trait for managing external process lifecycle
///
/// The transport type is associated so sessions can run against a real
/// child process or an in-process peer without changing their code.
#[async_trait]
pub trait ProcessManager: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;
    type Transport: Transport + 'static;

    /// Start the external process
    async fn start(&mut self) -> Result<(), Self::Error>;

    /// Force kill the external process
    async fn stop(&mut self) -> Result<(), Self::Error>;

    /// Check if the process is currently running
    fn is_running(&self) -> bool;

    /// Hand out the transport bound to the process's stdio
    ///
    /// Consumes the transport; a second call fails with a not-started error.
    fn create_transport(&mut self) -> Result<Self::Transport, Self::Error>;

    /// Synchronous force kill for Drop implementations
    fn kill_sync(&mut self);
}

/// Manages child processes spawned via Command
pub struct ChildProcessManager {
    /// Command to execute
    command: String,

    /// Command arguments
    args: Vec<String>,

    /// Working directory for the process (optional)
    working_directory: Option<PathBuf>,

    /// Append stderr lines to this file when set
    stderr_log_path: Option<PathBuf>,

    /// Thread-safe process state
    state: Arc<Mutex<ProcessState>>,

    /// Stdio transport (created when process starts)
    stdio_transport: Option<StdioTransport>,

    /// Stderr draining task handle
    stderr_task: Option<JoinHandle<()>>,

    /// Process wait task handle (waits for child to exit)
    wait_task: Option<JoinHandle<()>>,
}

impl ChildProcessManager {
    /// Create a new child process manager
    ///
    /// # Arguments
    /// * `command` - The command to execute
    /// * `args` - Command line arguments
    /// * `working_dir` - Optional working directory for the process
    pub fn new(command: String, args: Vec<String>, working_dir: Option<PathBuf>) -> Self {
        Self {
            command,
            args,
            working_directory: working_dir,
            stderr_log_path: None,
            state: Arc::new(Mutex::new(ProcessState::NotStarted)),
            stdio_transport: None,
            stderr_task: None,
            wait_task: None,
        }
    }

    /// Append the child's stderr to `path` in addition to tracing it
    pub fn with_stderr_log(mut self, path: Option<PathBuf>) -> Self {
        self.stderr_log_path = path;
        self
    }

    /// Get current process state (thread-safe)
    pub fn get_state(&self) -> ProcessState {
        // Intentional .unwrap() - poisoned mutex indicates serious bug, panic is appropriate
        self.state.lock().unwrap().clone()
    }

    /// Spawn the stderr draining task
    ///
    /// Always drains stderr so the child never blocks on a full pipe.
    fn spawn_stderr_drain(&mut self, stderr: ChildStderr) {
        let log_path = self.stderr_log_path.clone();
        let command = self.command.clone();

        let task = tokio::spawn(async move {
            let mut reader = BufReader::new(stderr);
            let mut log_file = match log_path {
                Some(path) => match OpenOptions::new().create(true).append(true).open(&path).await
                {
                    Ok(file) => Some(file),
                    Err(e) => {
                        warn!("Failed to open stderr log {}: {}", path.display(), e);
                        None
                    }
                },
                None => None,
            };

            if let Some(file) = log_file.as_mut() {
                let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
                let header = format!("\n=== {command} SESSION STARTED: {timestamp} ===\n");
                let _ = file.write_all(header.as_bytes()).await;
            }

            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        trace!("ChildProcessManager: stderr EOF reached");
                        break;
                    }
                    Ok(_) => {
                        let content = line.trim_end();
                        if content.is_empty() {
                            continue;
                        }
                        debug!("{} stderr: {}", command, content);

                        if let Some(file) = log_file.as_mut() {
                            let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f");
                            let entry = format!("[{timestamp}] {content}\n");
                            if file.write_all(entry.as_bytes()).await.is_ok() {
                                let _ = file.flush().await;
                            }
                        }
                    }
                    Err(e) => {
                        error!("Failed to read from stderr: {}", e);
                        break;
                    }
                }
            }

            trace!("ChildProcessManager: stderr draining finished");
        });

        self.stderr_task = Some(task);
    }

    /// Spawn the wait task that monitors child process exit
    fn spawn_wait_task(&mut self, mut child: Child) {
        let current_pid = self.get_state().pid();
        let state = Arc::clone(&self.state);

        let task = tokio::spawn(async move {
            match child.wait().await {
                Ok(exit_status) => {
                    info!(
                        "Process PID {:?} exited with status: {}",
                        current_pid, exit_status
                    );
                }
                Err(e) => {
                    error!("Error waiting for child process: {}", e);
                }
            }

            if let Ok(mut process_state) = state.lock() {
                *process_state = ProcessState::Stopped;
            }
        });

        self.wait_task = Some(task);
    }

    #[cfg(unix)]
    fn kill(pid: u32) {
        // SAFETY: plain kill(2) on a pid we spawned and still consider running
        if unsafe { libc::kill(pid as libc::pid_t, libc::SIGKILL) } == 0 {
            debug!("Sent SIGKILL to process {}", pid);
        }
    }

    #[cfg(not(unix))]
    fn kill(_pid: u32) {
        warn!("Process termination by signal is only implemented on unix");
    }
}

#[async_trait]
impl ProcessManager for ChildProcessManager {
    type Error = ProcessError;
    type Transport = StdioTransport;

    async fn start(&mut self) -> Result<(), Self::Error> {
        if self.is_running() {
            return Err(ProcessError::AlreadyStarted);
        }

        info!("Starting process: {} {:?}", self.command, self.args);

        let mut command_builder = Command::new(&self.command);
        command_builder
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(working_dir) = &self.working_directory {
            command_builder.current_dir(working_dir);
        }

        let mut child = command_builder.spawn().map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                ProcessError::NotFound(self.command.clone())
            } else {
                ProcessError::Io(e)
            }
        })?;

        let pid = child
            .id()
            .ok_or_else(|| ProcessError::Io(io::Error::other("Failed to get process ID")))?;
        info!("Process started with PID: {}", pid);

        // Intentional .unwrap() - poisoned mutex indicates serious bug, panic is appropriate
        *self.state.lock().unwrap() = ProcessState::Running { pid };

        // Extract stdio streams before moving child to the wait task
        let stdin = child.stdin.take().ok_or(ProcessError::StdinNotAvailable)?;
        let stdout = child
            .stdout
            .take()
            .ok_or(ProcessError::StdoutNotAvailable)?;
        let stderr = child
            .stderr
            .take()
            .ok_or(ProcessError::StderrNotAvailable)?;

        self.stdio_transport = Some(StdioTransport::from_child(stdin, stdout));
        self.spawn_stderr_drain(stderr);
        self.spawn_wait_task(child);

        Ok(())
    }

    async fn stop(&mut self) -> Result<(), Self::Error> {
        // Dropping an unclaimed transport closes the pipes
        if let Some(transport) = self.stdio_transport.take() {
            let _ = transport.close().await;
        }

        let pid = match self.get_state().pid() {
            Some(pid) => pid,
            None => return Err(ProcessError::NotStarted),
        };

        info!("Force killing process with PID: {}", pid);
        Self::kill(pid);

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }

        // The wait task will also record the exit once the child is reaped
        // Intentional .unwrap() - poisoned mutex indicates serious bug, panic is appropriate
        *self.state.lock().unwrap() = ProcessState::Stopped;

        Ok(())
    }

    fn is_running(&self) -> bool {
        self.get_state().is_running()
    }

    fn create_transport(&mut self) -> Result<StdioTransport, Self::Error> {
        self.stdio_transport.take().ok_or(ProcessError::NotStarted)
    }

    fn kill_sync(&mut self) {
        let pid = match self.get_state().pid() {
            Some(pid) => pid,
            None => return,
        };

        info!("Synchronously force killing process with PID: {}", pid);
        Self::kill(pid);

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }

        // Intentional .unwrap() - poisoned mutex indicates serious bug, panic is appropriate
        *self.state.lock().unwrap() = ProcessState::Stopped;
    }
}

// ============================================================================
// Tests
// ============================================================================
