//! In-process fake Neovim for session and router tests
//!
//! Speaks msgpack-rpc over `tokio::io::duplex`, keeps a buffer and position
//! registers, and records every call so tests can assert on the protocol.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rmpv::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use crate::cmdline::position::ExternalPosition;
use crate::io::transport::StreamTransport;
use crate::io::{ProcessError, ProcessManager};
use crate::rpc::codec::{MessageDecoder, encode_message};
use crate::rpc::protocol::RpcMessage;

// ============================================================================
// Fake Neovim
// ============================================================================

/// Behaviour knobs for the fake
#[derive(Debug, Clone, Default)]
pub struct FakeNvimConfig {
    /// Report a blocking mode after `<CR>` until `<Esc>` arrives
    pub blocking_after_execute: bool,
    /// Answer this method with an error payload
    pub failing_method: Option<String>,
    /// Close the connection instead of answering this method
    pub crash_on: Option<String>,
    /// Buffer content after `<CR>`
    pub lines_after_execute: Option<Vec<String>>,
    /// Cursor after `<CR>`
    pub cursor_after_execute: Option<ExternalPosition>,
    /// Send a request and a notification of our own before the first reply
    pub send_inbound_messages: bool,
}

/// What the fake saw and what it holds
#[derive(Debug, Default)]
pub struct FakeNvimState {
    /// Method names of every request, in arrival order
    pub calls: Vec<String>,
    /// Keys passed to `nvim_input`, in arrival order
    pub keys: Vec<String>,
    pub lines: Vec<String>,
    pub positions: HashMap<String, ExternalPosition>,
    pub blocking: bool,
    pub quit: bool,
    /// Responses the host sent to our inbound requests
    pub inbound_replies: usize,
}

/// Handle onto a running fake
#[derive(Clone)]
pub struct FakeNvim {
    state: Arc<Mutex<FakeNvimState>>,
}

impl FakeNvim {
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn keys(&self) -> Vec<String> {
        self.state.lock().unwrap().keys.clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.state.lock().unwrap().lines.clone()
    }

    pub fn position(&self, register: &str) -> Option<ExternalPosition> {
        self.state.lock().unwrap().positions.get(register).copied()
    }

    pub fn inbound_replies(&self) -> usize {
        self.state.lock().unwrap().inbound_replies
    }

    /// Count of `<Esc>` keys received
    pub fn escapes(&self) -> usize {
        self.keys().iter().filter(|k| k.as_str() == "<Esc>").count()
    }

    /// Wait briefly for the quit notification
    pub async fn wait_for_quit(&self) -> bool {
        for _ in 0..100 {
            if self.state.lock().unwrap().quit {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeNvimState {
                lines: vec![String::new()],
                ..Default::default()
            })),
        }
    }

    /// Start serving and return the host side transport
    fn serve(&self, config: FakeNvimConfig) -> StreamTransport {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (read, write) = tokio::io::split(client);
        tokio::spawn(serve(server, config, Arc::clone(&self.state)));
        StreamTransport::new(read, write)
    }
}

/// Start a fake Neovim and return the host side transport
pub fn spawn_fake_nvim(config: FakeNvimConfig) -> (StreamTransport, FakeNvim) {
    let nvim = FakeNvim::new();
    let transport = nvim.serve(config);
    (transport, nvim)
}

async fn serve(mut stream: DuplexStream, config: FakeNvimConfig, state: Arc<Mutex<FakeNvimState>>) {
    let mut decoder = MessageDecoder::new();
    let mut buf = vec![0u8; 8192];
    let mut greeted = !config.send_inbound_messages;

    loop {
        let message = match decoder.next_message() {
            Ok(Some(message)) => message,
            Ok(None) => match stream.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => {
                    if decoder.push(&buf[..n]).is_err() {
                        return;
                    }
                    continue;
                }
            },
            Err(_) => return,
        };

        match message {
            RpcMessage::Request { id, method, params } => {
                if config.crash_on.as_deref() == Some(method.as_str()) {
                    return;
                }
                if !greeted {
                    greeted = true;
                    let request = RpcMessage::Request {
                        id: 9000,
                        method: "host_query".to_string(),
                        params: vec![],
                    };
                    let notification = RpcMessage::Notification {
                        method: "nvim_error_event".to_string(),
                        params: vec![Value::from(0), Value::from("fake event")],
                    };
                    for message in [request, notification] {
                        if write(&mut stream, message).await.is_err() {
                            return;
                        }
                    }
                }

                let reply = if config.failing_method.as_deref() == Some(method.as_str()) {
                    state.lock().unwrap().calls.push(method.clone());
                    RpcMessage::failure(id, format!("E5555: {method} failed"))
                } else {
                    let result = handle_request(&config, &state, &method, params);
                    RpcMessage::success(id, result)
                };
                if write(&mut stream, reply).await.is_err() {
                    return;
                }
            }
            RpcMessage::Notification { method, params } => {
                let is_quit = method == "nvim_command"
                    && params.first().and_then(Value::as_str) == Some("qa!");
                if is_quit {
                    state.lock().unwrap().quit = true;
                    return;
                }
            }
            RpcMessage::Response { .. } => {
                state.lock().unwrap().inbound_replies += 1;
            }
        }
    }
}

async fn write(stream: &mut DuplexStream, message: RpcMessage) -> std::io::Result<()> {
    let bytes = encode_message(message).map_err(std::io::Error::other)?;
    stream.write_all(&bytes).await
}

fn handle_request(
    config: &FakeNvimConfig,
    state: &Mutex<FakeNvimState>,
    method: &str,
    params: Vec<Value>,
) -> Value {
    let mut state = state.lock().unwrap();
    state.calls.push(method.to_string());

    match method {
        "nvim_buf_set_lines" => {
            if let Some(Value::Array(lines)) = params.get(4) {
                state.lines = lines
                    .iter()
                    .filter_map(|line| line.as_str().map(str::to_string))
                    .collect();
            }
            Value::Nil
        }
        "nvim_buf_get_lines" => Value::Array(
            state
                .lines
                .iter()
                .map(|line| Value::from(line.as_str()))
                .collect(),
        ),
        "nvim_call_function" => {
            let function = params.first().and_then(Value::as_str).unwrap_or_default();
            let args = params.get(1).and_then(Value::as_array).cloned().unwrap_or_default();
            let register = args
                .first()
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            match function {
                "setpos" => {
                    let pos = args.get(1).and_then(Value::as_array).cloned().unwrap_or_default();
                    let field = |i: usize| pos.get(i).and_then(Value::as_i64).unwrap_or_default();
                    state.positions.insert(
                        register,
                        ExternalPosition {
                            line: field(1),
                            column: field(2),
                        },
                    );
                    Value::from(0)
                }
                "getpos" => {
                    let position = state
                        .positions
                        .get(&register)
                        .copied()
                        .unwrap_or(ExternalPosition { line: 0, column: 0 });
                    Value::Array(vec![
                        Value::from(0),
                        Value::from(position.line),
                        Value::from(position.column),
                        Value::from(0),
                    ])
                }
                _ => Value::Nil,
            }
        }
        "nvim_input" => {
            let keys = params
                .first()
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            match keys.as_str() {
                "<CR>" => {
                    if let Some(lines) = &config.lines_after_execute {
                        state.lines = lines.clone();
                    }
                    if let Some(cursor) = config.cursor_after_execute {
                        state.positions.insert(".".to_string(), cursor);
                    }
                    state.blocking = config.blocking_after_execute;
                }
                "<Esc>" => state.blocking = false,
                _ => {}
            }
            let len = keys.len() as u64;
            state.keys.push(keys);
            Value::from(len)
        }
        "nvim_get_mode" => {
            let mode = if state.blocking { "r" } else { "n" };
            Value::Map(vec![
                (Value::from("mode"), Value::from(mode)),
                (Value::from("blocking"), Value::from(state.blocking)),
            ])
        }
        _ => Value::Nil,
    }
}

// ============================================================================
// Fake Process Manager
// ============================================================================

/// Observable lifecycle of a fake process
#[derive(Debug, Default)]
pub struct FakeProcessFlags {
    pub starts: AtomicUsize,
    pub stopped: AtomicBool,
    pub killed_sync: AtomicBool,
}

impl FakeProcessFlags {
    pub fn started(&self) -> bool {
        self.starts.load(Ordering::SeqCst) > 0
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Process manager whose "process" is a fake Neovim task
pub struct FakeProcessManager {
    config: FakeNvimConfig,
    fail_spawn: bool,
    flags: Arc<FakeProcessFlags>,
    transport: Option<StreamTransport>,
    nvim: FakeNvim,
    running: bool,
}

impl FakeProcessManager {
    pub fn new(config: FakeNvimConfig) -> Self {
        Self {
            config,
            fail_spawn: false,
            flags: Arc::new(FakeProcessFlags::default()),
            transport: None,
            nvim: FakeNvim::new(),
            running: false,
        }
    }

    /// A manager whose start always fails as if the executable were missing
    pub fn failing_spawn() -> Self {
        Self {
            fail_spawn: true,
            ..Self::new(FakeNvimConfig::default())
        }
    }

    pub fn flags(&self) -> Arc<FakeProcessFlags> {
        Arc::clone(&self.flags)
    }

    /// Observer onto the fake Neovim this manager starts
    pub fn nvim(&self) -> FakeNvim {
        self.nvim.clone()
    }
}

#[async_trait]
impl ProcessManager for FakeProcessManager {
    type Error = ProcessError;
    type Transport = StreamTransport;

    async fn start(&mut self) -> Result<(), Self::Error> {
        if self.fail_spawn {
            return Err(ProcessError::NotFound("nvim".to_string()));
        }
        if self.running {
            return Err(ProcessError::AlreadyStarted);
        }
        self.transport = Some(self.nvim.serve(self.config.clone()));
        self.running = true;
        self.flags.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), Self::Error> {
        if !self.running {
            return Err(ProcessError::NotStarted);
        }
        self.transport = None;
        self.running = false;
        self.flags.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn create_transport(&mut self) -> Result<Self::Transport, Self::Error> {
        self.transport.take().ok_or(ProcessError::NotStarted)
    }

    fn kill_sync(&mut self) {
        if self.running {
            self.running = false;
            self.flags.killed_sync.store(true, Ordering::SeqCst);
        }
    }
}
