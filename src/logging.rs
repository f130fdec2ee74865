use std::io::Write;
use std::str::FromStr;

use chrono::Local;
use log::{LevelFilter, SetLoggerError};

/// Parses a level name, falling back to `Info` for anything unrecognised.
pub fn parse_level(level: &str) -> LevelFilter {
    LevelFilter::from_str(level.trim()).unwrap_or(LevelFilter::Info)
}

/// Installs the stderr logger. `RUST_LOG`, when set, overrides `level`.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}: {}",
                Local::now().to_rfc3339(),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .try_init()
}
