//! Path utilities for mixd configuration files

use std::path::PathBuf;

/// Get the default configuration directory
///
/// Returns: `$XDG_CONFIG_HOME/mixd` (or the platform equivalent), falling
/// back to `./mixd` when the platform reports no config directory.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mixd")
}

/// Get the default config file path
///
/// # Arguments
/// * `filename` - Config file name (e.g., "engine.yaml")
pub fn default_config_path(filename: &str) -> PathBuf {
    default_config_dir().join(filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir_ends_with_mixd() {
        assert!(default_config_dir().ends_with("mixd"));
    }

    #[test]
    fn test_config_path_includes_filename() {
        let path = default_config_path("engine.yaml");
        assert!(path.ends_with("engine.yaml"));
    }
}
