use std::path::PathBuf;

/// Environment names accepted by `EnvironmentType::from_str`
pub const ENVIRONMENT_NAMES: [&str; 3] = ["production", "staging", "regtest"];

/// Working directory under the user's home
pub const DEFAULT_DIR: &str = ".lnsdk";

/// `$HOME/.lnsdk`, or `.lnsdk` in the current directory without a home
pub fn default_working_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(DEFAULT_DIR),
        None => PathBuf::from(DEFAULT_DIR),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lnsdk::config::EnvironmentType;

    #[test]
    fn environment_names_test() {
        for name in ENVIRONMENT_NAMES {
            assert!(name.parse::<EnvironmentType>().is_ok(), "{}", name);
        }
    }

    #[test]
    fn default_working_dir_test() {
        assert!(default_working_dir().ends_with(DEFAULT_DIR));
    }
}
