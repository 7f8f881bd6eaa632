//! Typed wrappers for the Neovim API calls a delegated execution uses
//!
//! Every buffer call addresses the current buffer (handle 0); the embedded
//! editor only ever has the one scratch buffer we fill.

use std::time::Duration;

use rmpv::Value;
use tracing::{debug, trace};

use crate::cmdline::position::ExternalPosition;
use crate::io::Transport;
use crate::rpc::{InboundMessage, RpcChannel, RpcError};

/// Current buffer
const CURRENT_BUFFER: i64 = 0;

/// `end` index meaning "past the last line"
const END_OF_BUFFER: i64 = -1;

/// Key that enters command-line mode
pub const COMMAND_TRIGGER: &str = ":";

/// Key that executes the command line
pub const EXECUTE_KEY: &str = "<CR>";

/// Key that cancels a pending prompt or operator
pub const ESCAPE_KEY: &str = "<Esc>";

/// Result of `nvim_get_mode`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeInfo {
    /// Mode short name (`n`, `c`, `r?`, ...)
    pub mode: String,
    /// Whether Neovim is waiting for input and will not process other requests
    pub blocking: bool,
}

/// Split a command into the keys that type it on the command line
///
/// `<` starts key notation for `nvim_input`, so a literal one is sent as
/// `<LT>`. Every other character goes out as its own key.
pub fn command_keystrokes(command: &str) -> Vec<String> {
    let mut keys = Vec::with_capacity(command.chars().count() + 2);
    keys.push(COMMAND_TRIGGER.to_string());
    keys.extend(command.chars().map(|c| match c {
        '<' => "<LT>".to_string(),
        c => c.to_string(),
    }));
    keys.push(EXECUTE_KEY.to_string());
    keys
}

/// Neovim API client over an RPC channel
pub struct NvimClient {
    channel: RpcChannel,
}

impl NvimClient {
    pub fn new(channel: RpcChannel) -> Self {
        Self { channel }
    }

    /// Open a channel over `transport` and wrap it
    pub fn connect<T: Transport + 'static>(transport: T, request_timeout: Duration) -> Self {
        Self::new(RpcChannel::new(transport, request_timeout))
    }

    /// Replace every line of the current buffer
    pub async fn set_buffer_lines(&self, lines: &[String]) -> Result<(), RpcError> {
        let lines = lines.iter().map(|line| Value::from(line.as_str())).collect();
        self.channel
            .call(
                "nvim_buf_set_lines",
                vec![
                    Value::from(CURRENT_BUFFER),
                    Value::from(0),
                    Value::from(END_OF_BUFFER),
                    Value::from(true),
                    Value::Array(lines),
                ],
            )
            .await?;
        Ok(())
    }

    /// Read every line of the current buffer
    ///
    /// Lines that are not valid UTF-8 are converted lossily.
    pub async fn buffer_lines(&self) -> Result<Vec<String>, RpcError> {
        const METHOD: &str = "nvim_buf_get_lines";
        let reply = self
            .channel
            .call(
                METHOD,
                vec![
                    Value::from(CURRENT_BUFFER),
                    Value::from(0),
                    Value::from(END_OF_BUFFER),
                    Value::from(false),
                ],
            )
            .await?;

        let Value::Array(items) = reply else {
            return Err(RpcError::invalid_reply(METHOD, "expected an array of lines"));
        };

        items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(String::from_utf8_lossy(s.as_bytes()).into_owned()),
                Value::Binary(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
                other => Err(RpcError::invalid_reply(
                    METHOD,
                    format!("expected a line, got {other}"),
                )),
            })
            .collect()
    }

    /// Set a position register via `setpos()`
    pub async fn set_position(
        &self,
        register: &str,
        position: ExternalPosition,
    ) -> Result<(), RpcError> {
        trace!("setpos({}) -> {}:{}", register, position.line, position.column);
        self.channel
            .call(
                "nvim_call_function",
                vec![
                    Value::from("setpos"),
                    Value::Array(vec![
                        Value::from(register),
                        Value::Array(vec![
                            Value::from(CURRENT_BUFFER),
                            Value::from(position.line),
                            Value::from(position.column),
                            Value::from(0),
                        ]),
                    ]),
                ],
            )
            .await?;
        Ok(())
    }

    /// Read a position register via `getpos()`
    pub async fn position(&self, register: &str) -> Result<ExternalPosition, RpcError> {
        const METHOD: &str = "getpos";
        let reply = self
            .channel
            .call(
                "nvim_call_function",
                vec![
                    Value::from(METHOD),
                    Value::Array(vec![Value::from(register)]),
                ],
            )
            .await?;

        // [bufnum, lnum, col, off]
        let fields = reply
            .as_array()
            .ok_or_else(|| RpcError::invalid_reply(METHOD, "expected an array"))?;
        let field = |index: usize, name: &str| {
            fields
                .get(index)
                .and_then(Value::as_i64)
                .ok_or_else(|| RpcError::invalid_reply(METHOD, format!("missing {name}")))
        };

        Ok(ExternalPosition {
            line: field(1, "line")?,
            column: field(2, "column")?,
        })
    }

    /// Query the current mode
    pub async fn mode(&self) -> Result<ModeInfo, RpcError> {
        const METHOD: &str = "nvim_get_mode";
        let reply = self.channel.call(METHOD, vec![]).await?;

        let entries = reply
            .as_map()
            .ok_or_else(|| RpcError::invalid_reply(METHOD, "expected a map"))?;
        let lookup = |key: &str| {
            entries
                .iter()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v)
        };

        let mode = lookup("mode")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_reply(METHOD, "missing mode"))?
            .to_string();
        let blocking = lookup("blocking")
            .and_then(Value::as_bool)
            .ok_or_else(|| RpcError::invalid_reply(METHOD, "missing blocking"))?;

        Ok(ModeInfo { mode, blocking })
    }

    /// Queue raw keys; returns how many bytes Neovim accepted
    pub async fn input(&self, keys: &str) -> Result<u64, RpcError> {
        let reply = self
            .channel
            .call("nvim_input", vec![Value::from(keys)])
            .await?;
        Ok(reply.as_u64().unwrap_or_default())
    }

    /// Type `command` on the command line and execute it, one key per call
    pub async fn type_command(&self, command: &str) -> Result<(), RpcError> {
        let keys = command_keystrokes(command);
        debug!("Typing {} keys for command {:?}", keys.len(), command);
        for key in &keys {
            self.input(key).await?;
        }
        Ok(())
    }

    pub async fn escape(&self) -> Result<(), RpcError> {
        self.input(ESCAPE_KEY).await.map(|_| ())
    }

    /// Ask Neovim to quit without waiting for an answer it will never send
    pub fn quit(&self) -> Result<(), RpcError> {
        self.channel
            .notify("nvim_command", vec![Value::from("qa!")])
    }

    /// Take every peer-originated message received so far
    pub fn drain_inbound(&mut self) -> Vec<InboundMessage> {
        self.channel.drain_inbound()
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    pub async fn close(&mut self) {
        self.channel.close().await;
    }
}
