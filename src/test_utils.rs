//! Test utilities and global setup

/// Test logging utilities
#[cfg(all(test, feature = "test-logging"))]
pub mod logging {
    use std::sync::Once;
    use tracing_subscriber::{EnvFilter, fmt};

    static INIT: Once = Once::new();

    /// Initialize test logging once per test binary
    ///
    /// Honors `RUST_LOG`; otherwise logs this crate at debug and tokio at
    /// info. Output goes through the test writer so it is captured per test.
    ///
    /// ```bash
    /// RUST_LOG=nvim_cmdline_bridge::rpc=trace cargo test --features test-logging
    /// ```
    pub fn init() {
        INIT.call_once(|| {
            let env_filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("debug,tokio=info"));

            fmt()
                .with_env_filter(env_filter)
                .with_test_writer()
                .with_target(true)
                .with_thread_ids(true)
                .compact()
                .try_init()
                .ok(); // Another test may have initialized it already
        });
    }
}

/// Auto-initialize test logging for the enclosing test module
#[cfg(all(test, feature = "test-logging"))]
#[macro_export]
macro_rules! setup_test_logging {
    () => {
        #[ctor::ctor]
        fn init_test_logging() {
            $crate::test_utils::logging::init();
        }
    };
}

/// Neovim executable for integration tests
///
/// Reads `NVIM_PATH` so CI can pin a build; falls back to `nvim` on PATH.
#[cfg(all(test, feature = "nvim-integration-tests"))]
pub fn get_test_nvim_path() -> String {
    std::env::var("NVIM_PATH").unwrap_or_else(|_| "nvim".to_string())
}
