//! Embedded Neovim sessions
//!
//! Delegated commands run in a fresh `nvim --embed` child per invocation.
//!
//! # Architecture
//!
//! - **NvimConfig**: executable, working directory and timeouts, built and validated by `NvimConfigBuilder`
//! - **NvimClient**: typed wrappers over the few API calls a delegation needs
//! - **ProcessSession**: spawn, mirror state, type the command, read back, tear down
//!
//! # Usage
//!
//! ```rust,ignore
//! let config = NvimConfigBuilder::new().working_directory("/tmp").build()?;
//! let report = ProcessSession::from_config(&config)
//!     .run(&request, &mut editor)
//!     .await?;
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod session;

#[cfg(test)]
pub mod testing;

pub use config::{NvimConfig, NvimConfigBuilder};
pub use error::SessionError;
pub use session::{ProcessSession, SessionReport};
