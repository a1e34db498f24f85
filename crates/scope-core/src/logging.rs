#![forbid(unsafe_code)]

//! Structured logging setup.
//!
//! The digest engine emits `tracing` events and spans; it never installs a
//! subscriber itself. Applications that want JSON output can enable the
//! `tracing-json` feature and call [`init_json`] once at startup.
//!
//! The filter is read from `RUST_LOG` (for example
//! `RUST_LOG=scope_runtime=debug`), defaulting to [`DEFAULT_FILTER`].

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "warn";

/// Install a global JSON `tracing` subscriber.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
#[cfg(feature = "tracing-json")]
pub fn init_json() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let directives = filter.to_string();
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(true)
        .try_init()?;
    tracing::debug!(filter = %directives, "json logging installed");
    Ok(())
}
