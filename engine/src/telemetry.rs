//! Telemetry and Observability
//!
//! Handles setting up `tracing-subscriber` for structured logging.
//! Supports config-driven log levels, environment variable overrides,
//! and format switching between pretty (debug) and JSON (release).

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Characters of a user id kept in log lines
const SHORT_ID_CHARS: usize = 15;

/// Initialize the tracing subscriber with the given log level.
///
/// `RUST_LOG` overrides `log_level` when set. Only the first call installs
/// a subscriber.
///
/// In debug builds: pretty-printed terminal output.
/// In release builds: JSON structured output with spans.
/// Logs go to stderr so command output on stdout stays clean.
pub fn init_telemetry_with_level(log_level: &str) {
    // reqwest/hyper are noisy at debug
    let default_filter = format!(
        "{},parley_engine={},hyper=warn,reqwest=warn",
        log_level, log_level
    );

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter));

    #[cfg(debug_assertions)]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_current_span(true).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}

/// Shorten a user id for log output
///
/// Phone-number ids are personal data; logs only carry a prefix.
pub fn short_id(user: &str) -> String {
    if user.chars().count() <= SHORT_ID_CHARS {
        user.to_string()
    } else {
        let prefix: String = user.chars().take(SHORT_ID_CHARS).collect();
        format!("{}...", prefix)
    }
}
