//! Configuration for embedded Neovim sessions
//!
//! Provides NvimConfig with a validating builder. Every session starts from
//! a clean editor: no user config, no shada, no swap files.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::nvim::error::NvimConfigError;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Executable used when neither the builder nor NVIM_PATH names one
pub const DEFAULT_NVIM_PATH: &str = "nvim";

/// Environment variable overriding the Neovim executable
pub const NVIM_PATH_ENV: &str = "NVIM_PATH";

/// Default timeout for individual RPC calls (10 seconds)
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Maximum allowed request timeout (5 minutes)
pub const MAX_REQUEST_TIMEOUT_SECS: u64 = 300;

/// Arguments that isolate the embedded editor from the user's setup
const EMBED_ARGS: [&str; 8] = ["-u", "NONE", "-i", "NONE", "-n", "-N", "--embed", "--headless"];

// ============================================================================
// Core Configuration Types
// ============================================================================

/// Complete Neovim session configuration
#[derive(Debug, Clone)]
pub struct NvimConfig {
    /// Path to the nvim executable
    pub nvim_path: String,

    /// Working directory for the nvim process
    pub working_directory: PathBuf,

    /// Additional command-line arguments
    pub extra_args: Vec<String>,

    /// Timeout for individual RPC calls
    pub request_timeout: Duration,

    /// Append nvim's stderr to this file
    pub stderr_log_path: Option<PathBuf>,
}

impl Default for NvimConfig {
    fn default() -> Self {
        Self {
            nvim_path: DEFAULT_NVIM_PATH.to_string(),
            working_directory: std::env::temp_dir(),
            extra_args: Vec::new(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            stderr_log_path: None,
        }
    }
}

impl NvimConfig {
    /// Get the full command-line arguments for nvim
    pub fn get_nvim_args(&self) -> Vec<String> {
        let mut args: Vec<String> = EMBED_ARGS.iter().map(|arg| arg.to_string()).collect();
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

// ============================================================================
// Configuration Builder
// ============================================================================

/// Builder for NvimConfig with validation and defaults
#[derive(Debug, Default)]
pub struct NvimConfigBuilder {
    nvim_path: Option<String>,
    working_directory: Option<PathBuf>,
    extra_args: Vec<String>,
    request_timeout: Option<Duration>,
    stderr_log_path: Option<PathBuf>,
}

impl NvimConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the path to the nvim executable
    pub fn nvim_path(mut self, path: impl Into<String>) -> Self {
        self.nvim_path = Some(path.into());
        self
    }

    /// Set the working directory for the nvim process
    pub fn working_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(path.into());
        self
    }

    /// Add an extra command-line argument for nvim
    pub fn add_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    /// Set the per-call RPC timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the stderr log file path
    pub fn stderr_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.stderr_log_path = Some(path.into());
        self
    }

    /// Build the configuration with validation
    ///
    /// The executable falls back to `NVIM_PATH`, then to `nvim`. The working
    /// directory falls back to the system temp directory.
    pub fn build(self) -> Result<NvimConfig, NvimConfigError> {
        let nvim_path = self
            .nvim_path
            .or_else(|| std::env::var(NVIM_PATH_ENV).ok())
            .unwrap_or_else(|| DEFAULT_NVIM_PATH.to_string());
        let request_timeout = self
            .request_timeout
            .unwrap_or(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS));

        Self::validate_nvim_path(&nvim_path)?;
        let working_directory = self.working_directory.unwrap_or_else(std::env::temp_dir);

        Self::validate_working_directory(&working_directory)?;
        Self::validate_timeout(request_timeout)?;
        Self::validate_arguments(&self.extra_args)?;

        Ok(NvimConfig {
            nvim_path,
            working_directory,
            extra_args: self.extra_args,
            request_timeout,
            stderr_log_path: self.stderr_log_path,
        })
    }

    /// Validate working directory exists and is a directory
    fn validate_working_directory(path: &Path) -> Result<(), NvimConfigError> {
        if !path.exists() {
            return Err(NvimConfigError::WorkingDirectoryValidation {
                working_dir: path.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "Working directory does not exist",
                ),
            });
        }

        if !path.is_dir() {
            return Err(NvimConfigError::WorkingDirectoryValidation {
                working_dir: path.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "Working directory path is not a directory",
                ),
            });
        }

        Ok(())
    }

    /// Validate nvim executable path
    ///
    /// Existence is checked at spawn time; the name may resolve through PATH.
    fn validate_nvim_path(nvim_path: &str) -> Result<(), NvimConfigError> {
        if nvim_path.is_empty() {
            return Err(NvimConfigError::invalid_path(
                nvim_path,
                "Neovim path cannot be empty",
            ));
        }

        if nvim_path.contains('\0') {
            return Err(NvimConfigError::invalid_path(
                nvim_path,
                "Neovim path contains null character",
            ));
        }

        Ok(())
    }

    fn validate_timeout(timeout: Duration) -> Result<(), NvimConfigError> {
        if timeout.is_zero() {
            return Err(NvimConfigError::invalid_timeout(
                timeout,
                "Request timeout must be greater than zero",
            ));
        }

        if timeout > Duration::from_secs(MAX_REQUEST_TIMEOUT_SECS) {
            return Err(NvimConfigError::invalid_timeout(
                timeout,
                "Request timeout too long (max 5 minutes)",
            ));
        }

        Ok(())
    }

    fn validate_arguments(args: &[String]) -> Result<(), NvimConfigError> {
        if args.iter().any(|arg| arg.contains('\0')) {
            return Err(NvimConfigError::invalid_arguments(
                args.to_vec(),
                "Arguments cannot contain null characters",
            ));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_builder_full() {
        let temp_dir = tempdir().unwrap();

        let config = NvimConfigBuilder::new()
            .nvim_path("/usr/bin/nvim")
            .working_directory(temp_dir.path())
            .add_arg("--clean")
            .request_timeout(Duration::from_secs(30))
            .stderr_log(temp_dir.path().join("nvim.log"))
            .build()
            .unwrap();

        assert_eq!(config.nvim_path, "/usr/bin/nvim");
        assert_eq!(config.working_directory, temp_dir.path());
        assert_eq!(config.extra_args, vec!["--clean"]);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(config.stderr_log_path.is_some());
    }

    #[test]
    fn test_config_defaults() {
        let config = NvimConfigBuilder::new().nvim_path("nvim").build().unwrap();

        assert_eq!(
            config.request_timeout,
            Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)
        );
        assert_eq!(config.working_directory, std::env::temp_dir());
        assert_eq!(NvimConfig::default().working_directory, config.working_directory);
        assert!(config.extra_args.is_empty());
    }

    #[test]
    fn test_config_validation_invalid_timeout() {
        let result = NvimConfigBuilder::new()
            .nvim_path("nvim")
            .request_timeout(Duration::ZERO)
            .build();
        assert!(result.unwrap_err().to_string().contains("timeout"));

        let result = NvimConfigBuilder::new()
            .nvim_path("nvim")
            .request_timeout(Duration::from_secs(MAX_REQUEST_TIMEOUT_SECS + 1))
            .build();
        assert!(matches!(
            result,
            Err(NvimConfigError::InvalidTimeout { .. })
        ));
    }

    #[test]
    fn test_config_validation_invalid_paths() {
        let result = NvimConfigBuilder::new().nvim_path("").build();
        assert!(matches!(result, Err(NvimConfigError::InvalidPath { .. })));

        let result = NvimConfigBuilder::new().nvim_path("nv\0im").build();
        assert!(matches!(result, Err(NvimConfigError::InvalidPath { .. })));

        let temp_dir = tempdir().unwrap();
        let result = NvimConfigBuilder::new()
            .nvim_path("nvim")
            .working_directory(temp_dir.path().join("missing"))
            .build();
        assert!(matches!(
            result,
            Err(NvimConfigError::WorkingDirectoryValidation { .. })
        ));
    }

    #[test]
    fn test_nvim_args_generation() {
        let config = NvimConfigBuilder::new()
            .nvim_path("nvim")
            .add_arg("--cmd")
            .add_arg("set noswapfile")
            .build()
            .unwrap();

        let args = config.get_nvim_args();
        assert_eq!(&args[..2], &["-u", "NONE"]);
        assert!(args.contains(&"--embed".to_string()));
        assert!(args.contains(&"-N".to_string()));
        assert_eq!(&args[args.len() - 2..], &["--cmd", "set noswapfile"]);
    }
}
