use std::env;
use std::path::PathBuf;

use crate::config::default_working_dir;

/// Working directory override
pub const WORKING_DIR_VAR: &str = "LNSDK_WORKING_DIR";
/// Service API key
pub const API_KEY_VAR: &str = "LNSDK_API_KEY";
/// Log level, overridden in turn by `RUST_LOG`
pub const LOG_LEVEL_VAR: &str = "LNSDK_LOG_LEVEL";

/// Working directory, from `LNSDK_WORKING_DIR` or the platform default
pub fn working_dir() -> PathBuf {
    env::var_os(WORKING_DIR_VAR).map(PathBuf::from).unwrap_or_else(default_working_dir)
}

/// Service API key, if set and non-empty
pub fn api_key() -> Option<String> {
    env::var(API_KEY_VAR).ok().filter(|k| !k.is_empty())
}

/// Log level from the environment, if logging was asked for
pub fn log_level() -> Option<String> {
    env::var(LOG_LEVEL_VAR).ok().filter(|l| !l.is_empty())
}

/// Compare environment variable to a value
pub fn compare_env_var(key: &str, value: &str) -> bool {
    match env::var(key) {
        Ok(val) => val == value,
        Err(_) => false,
    }
}
