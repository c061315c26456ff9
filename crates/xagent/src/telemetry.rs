//! Logging setup

use serde_json::Value;
use tracing_subscriber::EnvFilter;

/// Environment switch forcing debug output
pub const DEBUG_ENV: &str = "XAGENT_DEBUG";

const DEFAULT_LEVEL: &str = "info";

/// Map the config `log_level` to a filter directive.
///
/// Numeric levels: 0 error, 1 warn, 2 info, 3 and above debug.
pub fn level_directive(log_level: Option<&Value>) -> &'static str {
    match log_level {
        Some(Value::Number(n)) => match n.as_u64() {
            Some(0) => "error",
            Some(1) => "warn",
            Some(2) => "info",
            Some(_) => "debug",
            None => DEFAULT_LEVEL,
        },
        Some(Value::String(s)) => match s.to_ascii_lowercase().as_str() {
            "error" => "error",
            "warn" => "warn",
            "info" => "info",
            "debug" => "debug",
            "trace" => "trace",
            _ => DEFAULT_LEVEL,
        },
        _ => DEFAULT_LEVEL,
    }
}

/// Install the global fmt subscriber.
///
/// `RUST_LOG` wins over everything; `XAGENT_DEBUG=YES` wins over the config.
pub fn init(log_level: Option<&Value>) {
    let directive = if std::env::var(DEBUG_ENV).map_or(false, |v| v == "YES") {
        "debug"
    } else {
        level_directive(log_level)
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    // A subscriber may already be installed when embedded
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
