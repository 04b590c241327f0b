use crate::error::{HelionError, Result};
use tracing::Level;

/// Parse a configured level name
pub fn parse_log_level(level_str: &str) -> Result<Level> {
    match level_str.trim().to_uppercase().as_str() {
        "TRACE" => Ok(Level::TRACE),
        "DEBUG" => Ok(Level::DEBUG),
        "INFO" => Ok(Level::INFO),
        "WARN" | "WARNING" => Ok(Level::WARN),
        "ERROR" => Ok(Level::ERROR),
        _ => Err(HelionError::config(format!(
            "Invalid log level: {}",
            level_str
        ))),
    }
}

pub(super) fn level_rank(level: Level) -> u8 {
    match level {
        Level::TRACE => 0,
        Level::DEBUG => 1,
        Level::INFO => 2,
        Level::WARN => 3,
        Level::ERROR => 4,
    }
}

pub(super) fn min_level(a: Level, b: Level) -> Level {
    if level_rank(a) <= level_rank(b) { a } else { b }
}

/// Try to parse a level out of a formatted log line
pub fn parse_line_level(line: &str) -> Option<Level> {
    const LEVELS: [(&str, Level); 5] = [
        ("TRACE", Level::TRACE),
        ("DEBUG", Level::DEBUG),
        ("INFO", Level::INFO),
        ("WARN", Level::WARN),
        ("ERROR", Level::ERROR),
    ];

    // JSON format first: ... "level":"INFO" ...
    for (name, level) in LEVELS {
        if line.contains(&format!("\"level\":\"{}\"", name)) {
            return Some(level);
        }
    }
    // Plain format: timestamp SPACE LEVEL SPACE ...
    for (name, level) in LEVELS {
        if line.contains(&format!(" {} ", name)) {
            return Some(level);
        }
    }
    None
}

/// Whether a formatted line passes the current runtime web level
pub fn should_emit_to_web(line: &str) -> bool {
    let current = super::state::get_web_log_level();
    match parse_line_level(line) {
        Some(line_lvl) => level_rank(line_lvl) >= level_rank(current),
        None => true,
    }
}

/// Parse and apply a runtime web level
pub fn set_web_log_level_str(level_str: &str) -> Result<()> {
    let lvl = parse_log_level(level_str)?;
    super::state::set_web_log_level(lvl);
    Ok(())
}
