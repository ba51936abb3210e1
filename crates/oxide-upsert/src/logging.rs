//! Log output.
//!
//! The library only emits `tracing` events. Applications that do not install
//! their own subscriber can call [`init`], which reads the level from
//! [`LOG_LEVEL_ENV`] once.

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use crate::error::{Result, UpsertError};

/// Environment variable holding the log level.
pub const LOG_LEVEL_ENV: &str = "OXIDE_UPSERT_LOG";

/// Parses `trace`, `debug`, `info`, `warn` or `error` (case insensitive).
pub fn parse_level(value: &str) -> Result<Level> {
    value.trim().parse::<Level>().map_err(|e| {
        UpsertError::InvalidArgument(format!("{LOG_LEVEL_ENV} is invalid ({e}): {value:?}"))
    })
}

/// Installs a global fmt subscriber at the level from [`LOG_LEVEL_ENV`]
/// (`info` when unset).
///
/// # Errors
///
/// Fails on an unknown level or if a global subscriber is already installed.
pub fn init() -> Result<()> {
    let level = match std::env::var(LOG_LEVEL_ENV) {
        Ok(value) => parse_level(&value)?,
        Err(_) => Level::INFO,
    };
    init_with_level(level)
}

/// Installs a global fmt subscriber at `level`.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_with_level(level: Level) -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| UpsertError::InvalidArgument(format!("cannot install logger: {e}")))
}
