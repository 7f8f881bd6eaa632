//! Error types for the msgpack-rpc layer

use std::time::Duration;

use crate::rpc::protocol::RemoteError;

/// Errors surfaced by the RPC channel and codec
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The peer went away before answering
    #[error("RPC channel closed")]
    ChannelClosed,

    /// The peer answered with an error payload
    #[error("Remote error in {method}: {error}")]
    Remote { method: String, error: RemoteError },

    /// No answer within the configured request timeout
    #[error("Request {method} timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    /// Wire encoding/decoding failure
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Underlying transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Structurally valid msgpack that is not a valid message
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// A request with a readable id whose other fields are unusable
    #[error("Invalid request {id}: {reason}")]
    InvalidRequest { id: u64, reason: String },

    /// A reply whose shape does not match what the method returns
    #[error("Invalid reply to {method}: {reason}")]
    InvalidReply { method: String, reason: String },
}

/// Errors from msgpack encoding and incremental decoding
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Failed to encode message: {0}")]
    Encode(String),

    #[error("Failed to decode message: {0}")]
    Decode(String),

    #[error("Message too large: {size} bytes buffered (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

impl RpcError {
    /// Create an invalid message error
    pub fn invalid_message(reason: impl Into<String>) -> Self {
        Self::InvalidMessage(reason.into())
    }

    /// Create an invalid reply error
    pub fn invalid_reply(method: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidReply {
            method: method.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error means the peer can no longer be reached
    pub fn is_channel_closed(&self) -> bool {
        matches!(self, RpcError::ChannelClosed | RpcError::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation_helpers() {
        let error = RpcError::invalid_reply("nvim_get_mode", "not a map");
        assert!(matches!(error, RpcError::InvalidReply { .. }));
        assert!(error.to_string().contains("nvim_get_mode"));
        assert!(!error.is_channel_closed());

        assert!(RpcError::ChannelClosed.is_channel_closed());
    }

    #[test]
    fn test_codec_error_conversion() {
        let error: RpcError = CodecError::Decode("bad marker".to_string()).into();
        assert!(matches!(error, RpcError::Codec(_)));
    }
}
