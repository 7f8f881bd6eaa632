//! I/O layer - Generic abstractions for process management and transport
//!
//! This module provides fundamental I/O abstractions that are not specific to any protocol:
//!
//! - **Transport**: Pure byte-level I/O for bidirectional exchange
//! - **Process**: External process lifecycle management with stdio integration
//!
//! The msgpack-rpc layer (`crate::rpc`) is built on top of these.

pub mod process;
pub mod transport;

pub use process::{ChildProcessManager, ProcessError, ProcessManager};
pub use transport::Transport;
