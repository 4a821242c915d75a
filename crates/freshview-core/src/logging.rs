//! Opt-in log output for host binaries.
//!
//! The primitives only emit `tracing` events; nothing is printed until a
//! host installs a subscriber. Hosts without their own subscriber can call
//! [`init_logging`] (feature `tracing-json`). The filter comes from the
//! `FRESHVIEW_LOG` environment variable and defaults to `warn`.

/// Environment variable holding the `EnvFilter` directive.
pub const LOG_ENV: &str = "FRESHVIEW_LOG";

/// Default filter when [`LOG_ENV`] is unset or invalid.
pub const DEFAULT_FILTER: &str = "warn";

/// Output format for [`init_logging`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Install a global `tracing-subscriber`. Returns `false` if a global
/// subscriber was already set.
#[cfg(feature = "tracing-json")]
pub fn init_logging(format: LogFormat) -> bool {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Pretty => builder.try_init().is_ok(),
        LogFormat::Json => builder.json().try_init().is_ok(),
    }
}

#[cfg(all(test, feature = "tracing-json"))]
mod tests {
    use super::*;

    #[test]
    fn second_init_reports_existing_subscriber() {
        let _ = init_logging(LogFormat::Json);
        assert!(!init_logging(LogFormat::Pretty));
    }
}
