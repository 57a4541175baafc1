//! Logging utilities
//!
//! The engines log through the `log` facade; binaries install `env_logger`
//! once at startup through [`ogs_log_init`].

pub use log::{debug, error, info, trace, warn};
use log::LevelFilter;

/// Parse a configured level name, falling back to `info`.
pub fn ogs_log_level_from_str(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "none" | "off" => LevelFilter::Off,
        "fatal" | "error" => LevelFilter::Error,
        "warn" | "warning" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

/// Install the global logger.
///
/// `RUST_LOG` still overrides the configured level when it is set.
pub fn ogs_log_init(level: LevelFilter, color: bool) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    builder.format_timestamp_millis();
    if !color {
        builder.write_style(env_logger::WriteStyle::Never);
    }
    if let Ok(spec) = std::env::var("RUST_LOG") {
        builder.parse_filters(&spec);
    }
    if builder.try_init().is_err() {
        log::debug!("logger already initialized");
    }
}

/// Assert a programming invariant.
///
/// A violation indicates a bug in the calling control logic, never an
/// external fault, so it is logged and then panics.
#[macro_export]
macro_rules! ogs_assert {
    ($cond:expr $(,)?) => {
        if !$cond {
            $crate::log::error!("[FATAL] assertion failed: {}", stringify!($cond));
            panic!("assertion failed: {}", stringify!($cond));
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::log::error!("[FATAL] {}", format!($($arg)+));
            panic!($($arg)+);
        }
    };
}
