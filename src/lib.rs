//! Collects public HTTP proxies, validates them against a target URL and
//! keeps the validated list fresh.
//!
//! The [`cache::ProxyCache`] is the entry point for long-running use; the
//! [`validator::ProxyValidator`] and the [`providers::ProviderSupplier`] can
//! also be driven directly for one-shot passes.

pub mod cache;
pub mod error;
pub mod negotiators;
pub mod providers;
pub mod proxy;
pub mod validator;

pub use cache::ProxyCache;
pub use error::{Error, Result};
pub use validator::ProxyValidator;

/// Initializes the logging system for the application.
///
/// This function configures the logging system with the specified verbosity level.
///
/// # Arguments
///
/// * `log_level`: The desired verbosity level for logging. Determines which log messages will be displayed.
///
/// # Returns
///
/// A result indicating the success or failure of the logging setup.
#[cfg(feature = "log")]
pub fn initialize_logging(log_level: log::LevelFilter) -> anyhow::Result<()> {
    stderrlog::new()
        .module(module_path!()) // Configures the module path for log messages.
        .show_module_names(true) // Enables module names in log output.
        .verbosity(log_level) // Sets the specified log verbosity level.
        .timestamp(stderrlog::Timestamp::Millisecond)
        .init()?; // Initializes the logger.
    Ok(())
}
