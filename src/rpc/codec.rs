//! msgpack-rpc wire codec
//!
//! msgpack-rpc has no framing header: messages are msgpack values written
//! back to back. The decoder keeps unconsumed bytes between reads and only
//! yields a message once a complete value is buffered.

use std::io::{Cursor, ErrorKind};

use rmpv::Value;
use tracing::trace;

use crate::rpc::error::{CodecError, RpcError};
use crate::rpc::protocol::RpcMessage;

/// Maximum buffered bytes to prevent memory exhaustion
pub const MAX_BUFFERED_SIZE: usize = 64 * 1024 * 1024; // 64MB

/// Encode a message to its wire bytes
pub fn encode_message(message: RpcMessage) -> Result<Vec<u8>, CodecError> {
    let mut bytes = Vec::new();
    rmpv::encode::write_value(&mut bytes, &message.into_value())
        .map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(bytes)
}

/// Incremental decoder for a stream of msgpack-rpc messages
#[derive(Debug, Default)]
pub struct MessageDecoder {
    buffer: Vec<u8>,
}

impl MessageDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly received bytes
    pub fn push(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        if self.buffer.len() + bytes.len() > MAX_BUFFERED_SIZE {
            return Err(CodecError::MessageTooLarge {
                size: self.buffer.len() + bytes.len(),
                max: MAX_BUFFERED_SIZE,
            });
        }
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    /// Number of bytes waiting for the rest of a message
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Decode the next complete message, or `None` if more bytes are needed
    ///
    /// A complete value that is not a valid message is consumed and
    /// reported, so one bad message does not wedge the stream.
    pub fn next_message(&mut self) -> Result<Option<RpcMessage>, RpcError> {
        let Some(value) = self.next_value()? else {
            return Ok(None);
        };
        RpcMessage::try_from(value).map(Some)
    }

    fn next_value(&mut self) -> Result<Option<Value>, CodecError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        let mut cursor = Cursor::new(self.buffer.as_slice());
        match rmpv::decode::read_value(&mut cursor) {
            Ok(value) => {
                let consumed = cursor.position() as usize;
                self.buffer.drain(..consumed);
                trace!("MessageDecoder: decoded value ({} bytes)", consumed);
                Ok(Some(value))
            }
            Err(rmpv::decode::Error::InvalidMarkerRead(e))
            | Err(rmpv::decode::Error::InvalidDataRead(e))
                if e.kind() == ErrorKind::UnexpectedEof =>
            {
                trace!(
                    "MessageDecoder: incomplete message ({} bytes buffered)",
                    self.buffer.len()
                );
                Ok(None)
            }
            Err(e) => {
                // Nothing after a corrupt marker can be trusted
                self.buffer.clear();
                Err(CodecError::Decode(e.to_string()))
            }
        }
    }
}
