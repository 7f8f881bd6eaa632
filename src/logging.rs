use std::env;
use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter when neither RUST_LOG nor --log-level is given
const DEFAULT_LOG_LEVEL: &str = "warn";

/// Configuration for the logging system
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level filter (e.g., "debug", "info", "warn", "error")
    pub level: String,
    /// Optional log file path. If None, logs only to stderr
    pub file_path: Option<PathBuf>,
    /// Whether to use structured JSON format for logs
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            file_path: None,
            json_format: false,
        }
    }
}

impl LogConfig {
    /// Create LogConfig from environment variables
    pub fn from_env() -> Self {
        let level = env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string());

        let file_path = env::var("CMDLINE_LOG_FILE").ok().map(|path| {
            let path_buf = PathBuf::from(path);
            if env::var("CMDLINE_LOG_UNIQUE").unwrap_or_default() == "true" {
                unique_log_path(path_buf, std::process::id())
            } else {
                path_buf
            }
        });

        let json_format = env::var("CMDLINE_LOG_JSON").unwrap_or_default() == "true";

        Self {
            level,
            file_path,
            json_format,
        }
    }

    /// Override values from CLI arguments
    pub fn with_overrides(mut self, level: Option<String>, file_path: Option<PathBuf>) -> Self {
        if let Some(level) = level {
            self.level = level;
        }
        if let Some(file_path) = file_path {
            self.file_path = Some(file_path);
        }
        self
    }
}

/// Insert `pid` before the extension so concurrent invocations don't share a file
fn unique_log_path(mut path: PathBuf, pid: u32) -> PathBuf {
    let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
        return path;
    };

    let unique = match path.extension().and_then(|ext| ext.to_str()) {
        Some(extension) => format!("{stem}.{pid}.{extension}"),
        None => format!("{stem}.{pid}"),
    };
    path.set_file_name(unique);
    path
}

/// Initialize the logging system based on configuration
///
/// Everything goes to stderr or a file; stdout carries command output.
pub fn init_logging(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_new(&config.level)
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_LEVEL))?;

    let to_file = config.file_path.is_some();
    let writer = match &config.file_path {
        Some(file_path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(file_path)?;
            BoxMakeWriter::new(Arc::new(file))
        }
        None => BoxMakeWriter::new(io::stderr),
    };

    let subscriber = tracing_subscriber::registry().with(env_filter);
    if config.json_format {
        subscriber
            .with(fmt::layer().json().with_writer(writer).with_ansi(false))
            .try_init()?;
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(!to_file)
                    .with_target(true)
                    .with_line_number(to_file),
            )
            .try_init()?;
    }

    Ok(())
}

/// Log one msgpack-rpc message as a single structured event
#[macro_export]
macro_rules! log_rpc_message {
    ($level:expr, $direction:expr, $method:expr, $data:expr) => {
        tracing::event!(
            $level,
            direction = $direction,
            method = $method,
            data = ?$data,
            pid = std::process::id(),
            "RPC message"
        );
    };
}

/// Log performance timing
#[macro_export]
macro_rules! log_timing {
    ($level:expr, $operation:expr, $duration:expr) => {
        tracing::event!(
            $level,
            operation = $operation,
            duration_ms = $duration.as_millis() as u64,
            pid = std::process::id(),
            "Performance timing"
        );
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_log_path_keeps_extension() {
        let path = unique_log_path(PathBuf::from("/tmp/bridge.log"), 42);
        assert_eq!(path, PathBuf::from("/tmp/bridge.42.log"));

        let path = unique_log_path(PathBuf::from("/tmp/bridge"), 7);
        assert_eq!(path, PathBuf::from("/tmp/bridge.7"));
    }

    #[test]
    fn test_cli_overrides_win() {
        let config = LogConfig::default()
            .with_overrides(Some("debug".to_string()), Some(PathBuf::from("out.log")));

        assert_eq!(config.level, "debug");
        assert_eq!(config.file_path, Some(PathBuf::from("out.log")));
        assert!(!config.json_format);
    }

    #[test]
    fn test_overrides_absent_keep_defaults() {
        let config = LogConfig::default().with_overrides(None, None);
        assert_eq!(config.level, DEFAULT_LOG_LEVEL);
        assert!(config.file_path.is_none());
    }
}
