//! One delegated execution against an embedded Neovim
//!
//! A session spawns Neovim, mirrors the editor state into it, types the
//! command, reads the result back and always tears the process down. It is
//! consumed by `run`; nothing survives between commands.

use std::time::{Duration, Instant};

use tracing::{Level, debug, info, warn};

use crate::cmdline::editor::{CommandRequest, Editor};
use crate::cmdline::position::{
    CURSOR_REGISTER, Position, SELECTION_END_REGISTER, SELECTION_START_REGISTER, from_external,
    mark_register, to_external,
};
use crate::io::{ChildProcessManager, ProcessError, ProcessManager};
use crate::log_timing;
use crate::nvim::api::NvimClient;
use crate::nvim::config::NvimConfig;
use crate::nvim::error::SessionError;
use crate::rpc::InboundMessage;

// Step names used in errors and logs
const PUSH_BUFFER: &str = "push buffer";
const PUSH_POSITIONS: &str = "push positions";
const TYPE_COMMAND: &str = "type command";
const QUERY_MODE: &str = "query mode";
const SEND_ESCAPE: &str = "send escape";
const READ_BUFFER: &str = "read buffer";
const READ_CURSOR: &str = "read cursor";

/// What a completed delegated execution did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    /// Neovim was left blocking and needed an escape
    pub escape_sent: bool,
    /// Lines read back into the editor
    pub line_count: usize,
    /// Cursor read back, if Neovim reported a usable one
    pub cursor: Option<Position>,
    /// Requests and notifications Neovim sent us
    pub inbound_messages: usize,
    pub elapsed: Duration,
}

/// Single-use Neovim session
pub struct ProcessSession<M: ProcessManager<Error = ProcessError>> {
    process: M,
    request_timeout: Duration,
}

impl ProcessSession<ChildProcessManager> {
    /// Session over a real `nvim --embed` child
    pub fn from_config(config: &NvimConfig) -> Self {
        let process = ChildProcessManager::new(
            config.nvim_path.clone(),
            config.get_nvim_args(),
            Some(config.working_directory.clone()),
        )
        .with_stderr_log(config.stderr_log_path.clone());
        Self::new(process, config.request_timeout)
    }
}

impl<M: ProcessManager<Error = ProcessError>> ProcessSession<M> {
    pub fn new(process: M, request_timeout: Duration) -> Self {
        Self {
            process,
            request_timeout,
        }
    }

    /// Run `request` in Neovim and copy the result into `editor`
    ///
    /// The first failing step aborts the rest. Neovim is asked to quit and
    /// then killed on every path, including failures.
    pub async fn run(
        mut self,
        request: &CommandRequest,
        editor: &mut dyn Editor,
    ) -> Result<SessionReport, SessionError> {
        let start = Instant::now();
        info!("Delegating command to Neovim: {:?}", request.command());

        self.process.start().await.map_err(SessionError::Spawn)?;

        let transport = match self.process.create_transport() {
            Ok(transport) => transport,
            Err(e) => {
                self.teardown(None).await;
                return Err(SessionError::Process(e));
            }
        };
        let mut client = NvimClient::connect(transport, self.request_timeout);

        let result = Self::execute(&mut client, request, editor).await;
        self.teardown(Some(&mut client)).await;

        let mut report = result?;
        report.elapsed = start.elapsed();
        log_timing!(Level::DEBUG, "delegated_execution", report.elapsed);
        info!(
            escape_sent = report.escape_sent,
            line_count = report.line_count,
            cursor = ?report.cursor,
            inbound_messages = report.inbound_messages,
            "Delegated execution completed"
        );
        Ok(report)
    }

    /// Steps between connecting and teardown
    async fn execute(
        client: &mut NvimClient,
        request: &CommandRequest,
        editor: &mut dyn Editor,
    ) -> Result<SessionReport, SessionError> {
        let snapshot = request.snapshot();
        let mut report = SessionReport::default();

        client
            .set_buffer_lines(&snapshot.lines)
            .await
            .map_err(|e| SessionError::step(PUSH_BUFFER, e))?;
        report.inbound_messages += log_inbound(client, PUSH_BUFFER);

        let cursor = to_external(snapshot.cursor);
        let mut registers = vec![
            (CURSOR_REGISTER.to_string(), cursor),
            (SELECTION_END_REGISTER.to_string(), cursor),
            (
                SELECTION_START_REGISTER.to_string(),
                to_external(snapshot.selection_start),
            ),
        ];
        if !snapshot.marks.is_empty() {
            debug!("Pushing {} marks", snapshot.marks.len());
        }
        registers.extend(
            snapshot
                .marks
                .iter()
                .map(|mark| (mark_register(mark.name), to_external(mark.position))),
        );
        for (register, position) in &registers {
            client
                .set_position(register, *position)
                .await
                .map_err(|e| SessionError::step(PUSH_POSITIONS, e))?;
        }
        report.inbound_messages += log_inbound(client, PUSH_POSITIONS);

        client
            .type_command(request.command())
            .await
            .map_err(|e| SessionError::step(TYPE_COMMAND, e))?;
        report.inbound_messages += log_inbound(client, TYPE_COMMAND);

        let mode = client
            .mode()
            .await
            .map_err(|e| SessionError::step(QUERY_MODE, e))?;
        if mode.blocking {
            debug!("Neovim is blocking in mode {:?}, sending escape", mode.mode);
            client
                .escape()
                .await
                .map_err(|e| SessionError::step(SEND_ESCAPE, e))?;
            report.escape_sent = true;
        }

        let lines = client
            .buffer_lines()
            .await
            .map_err(|e| SessionError::step(READ_BUFFER, e))?;
        report.line_count = lines.len();
        editor.replace_all(lines);
        report.inbound_messages += log_inbound(client, READ_BUFFER);

        let cursor = client
            .position(CURSOR_REGISTER)
            .await
            .map_err(|e| SessionError::step(READ_CURSOR, e))?;
        match from_external(cursor) {
            Some(position) => {
                editor.set_selection(position);
                report.cursor = Some(position);
            }
            None => warn!(
                "Neovim reported no usable cursor ({}:{}), keeping editor selection",
                cursor.line, cursor.column
            ),
        }

        if editor.expand_tabs_on_delegation() {
            debug!("Expanding indentation tabs after delegation");
            editor.indentation_to_spaces();
        }

        Ok(report)
    }

    /// Quit, close the channel and kill the process
    async fn teardown(&mut self, client: Option<&mut NvimClient>) {
        if let Some(client) = client {
            report_unhandled(client.drain_inbound(), "teardown");
            if !client.is_connected() {
                debug!("Neovim already disconnected, not sending quit");
            } else if let Err(e) = client.quit() {
                debug!("Quit not sent, channel closed meanwhile: {}", e);
            }
            client.close().await;
        }

        if let Err(e) = self.process.stop().await {
            debug!("Stopping Neovim: {}", e);
        }
    }
}

/// Kill fallback when a session is dropped mid-run
impl<M: ProcessManager<Error = ProcessError>> Drop for ProcessSession<M> {
    fn drop(&mut self) {
        if self.process.is_running() {
            warn!("ProcessSession dropped with Neovim still running - force killing process");
            self.process.kill_sync();
        }
    }
}

fn log_inbound(client: &mut NvimClient, step: &str) -> usize {
    report_unhandled(client.drain_inbound(), step)
}

fn report_unhandled(messages: Vec<InboundMessage>, step: &str) -> usize {
    for message in &messages {
        match message {
            InboundMessage::Request { method, params } => {
                debug!(step, "Neovim request {} answered with an error: {:?}", method, params)
            }
            InboundMessage::Notification { method, params } => {
                debug!(step, "Neovim notification {}: {:?}", method, params)
            }
        }
    }
    messages.len()
}
