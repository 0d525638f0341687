//! Logging initialisation via tracing-subscriber.
//!
//! Logs always go to stderr. Stdout belongs to the console channel, which
//! prints replies and the prompt there, so `interact-bot -i 2>bot.log`
//! keeps the conversation readable while the log goes to a file. ANSI
//! colours are only used when stderr is a terminal.
//!
//! Call [`init`] once at startup, after the effective level is resolved.

use std::io::IsTerminal;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::error::AppError;

/// Initialise the global tracing subscriber on stderr.
///
/// See [`build_filter`] for how `level` and `RUST_LOG` combine.
pub fn init(level: &str, prefer_level: bool) -> Result<(), AppError> {
    let filter = build_filter(level, prefer_level)?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init()
        .map_err(|e| AppError::Logger(format!("failed to set subscriber: {e}")))?;

    Ok(())
}

/// Build the event filter.
///
/// A bare level (`"debug"`) applies to this crate only; dependencies such
/// as the HTTP client stay at `warn` or quieter. Anything else is taken as
/// a full `EnvFilter` directive list.
///
/// If `prefer_level` is `true`, `level` wins and `RUST_LOG` is only the
/// fallback when `level` is invalid. Otherwise `RUST_LOG` wins and `level`
/// is the fallback.
pub fn build_filter(level: &str, prefer_level: bool) -> Result<EnvFilter, AppError> {
    if prefer_level {
        match level_filter(level) {
            Ok(filter) => Ok(filter),
            Err(level_err) => EnvFilter::try_from_default_env().map_err(|env_err| {
                AppError::Logger(format!("{level_err}; RUST_LOG parse failed: {env_err}"))
            }),
        }
    } else {
        EnvFilter::try_from_default_env().or_else(|_| level_filter(level))
    }
}

fn level_filter(level: &str) -> Result<EnvFilter, AppError> {
    let directives = match parse_level(level) {
        Ok(own) => format!("{},interact_bot={own}", own.min(LevelFilter::WARN)),
        Err(_) => level.to_string(),
    };
    EnvFilter::try_new(&directives)
        .map_err(|e| AppError::Logger(format!("invalid log level '{level}': {e}")))
}

/// Parse a log level string into a [`LevelFilter`], returning an error on
/// unrecognised values.
pub fn parse_level(level: &str) -> Result<LevelFilter, AppError> {
    if level.is_empty() {
        return Err(AppError::Logger("log level must not be empty".into()));
    }
    level
        .parse::<LevelFilter>()
        .map_err(|_| AppError::Logger(format!("unrecognised log level: '{level}'")))
}

/// Map a `-v` count from the command line to a level string.
pub fn level_for_verbosity(count: u8) -> Option<&'static str> {
    match count {
        0 => None,
        1 => Some("info"),
        2 => Some("debug"),
        _ => Some("trace"),
    }
}
