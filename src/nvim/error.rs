//! Error types for Neovim session management

use std::path::PathBuf;
use std::time::Duration;

use crate::io::ProcessError;
use crate::rpc::RpcError;

// ============================================================================
// Session Errors
// ============================================================================

/// Failures of one delegated execution
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The Neovim process could not be started
    #[error("Failed to spawn Neovim: {0}")]
    Spawn(#[source] ProcessError),

    /// Process management errors after spawn (transport, stop)
    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    /// Channel failures, including remote errors and a closed channel
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    /// Configuration validation errors
    #[error("Configuration error: {0}")]
    Config(#[from] NvimConfigError),

    /// A protocol step failed
    #[error("Step '{step}' failed: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: RpcError,
    },
}

impl SessionError {
    /// Wrap an RPC failure with the protocol step it happened in
    pub fn step(step: &'static str, source: RpcError) -> Self {
        Self::Step { step, source }
    }

    /// The underlying RPC error, if the failure came from the channel
    pub fn rpc_error(&self) -> Option<&RpcError> {
        match self {
            Self::Rpc(e) | Self::Step { source: e, .. } => Some(e),
            _ => None,
        }
    }
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum NvimConfigError {
    /// Invalid path format or value
    #[error("Invalid path: {path} - {reason}")]
    InvalidPath { path: String, reason: String },

    /// Invalid timeout value
    #[error("Invalid timeout: {timeout:?} - {reason}")]
    InvalidTimeout { timeout: Duration, reason: String },

    /// Invalid extra arguments
    #[error("Invalid Neovim arguments: {args:?} - {reason}")]
    InvalidArguments { args: Vec<String>, reason: String },

    /// Working directory validation error
    #[error("Working directory validation failed: {working_dir}")]
    WorkingDirectoryValidation {
        working_dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl NvimConfigError {
    /// Create an invalid path error
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid timeout error
    pub fn invalid_timeout(timeout: Duration, reason: impl Into<String>) -> Self {
        Self::InvalidTimeout {
            timeout,
            reason: reason.into(),
        }
    }

    /// Create an invalid arguments error
    pub fn invalid_arguments(args: Vec<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            args,
            reason: reason.into(),
        }
    }
}
