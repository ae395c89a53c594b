//! Config file discovery.
//!
//! Resolution order (later overrides earlier):
//! 1. Built-in defaults
//! 2. `~/.config/opencode-client/client.toml` (or `$OPENCODE_CLIENT_CONFIG_DIR/client.toml`)
//! 3. Environment overrides (`OPENCODE_BASE_URL`, ...)

use std::path::{Path, PathBuf};

use crate::{ClientConfig, ConfigError, Result};

/// Default config filename within the config directory.
const CLIENT_CONFIG_FILE: &str = "client.toml";

/// Application name for XDG directory resolution.
const APP_NAME: &str = "opencode-client";

/// Environment variable to override the config directory.
const CONFIG_DIR_ENV: &str = "OPENCODE_CLIENT_CONFIG_DIR";

/// Load the client configuration from the default location.
///
/// A missing file is not an error: defaults are used. Environment overrides
/// are applied last and the result is validated.
pub fn load_config() -> Result<ClientConfig> {
    load_config_from_dir(xdg_config_dir().as_deref())
}

/// Load the client configuration from `dir/client.toml`, if present.
pub fn load_config_from_dir(dir: Option<&Path>) -> Result<ClientConfig> {
    let mut config = match dir.map(|d| d.join(CLIENT_CONFIG_FILE)) {
        Some(path) if path.is_file() => load_config_file(&path)?,
        _ => ClientConfig::default(),
    };
    config.apply_env()?;
    config.validate()?;
    Ok(config)
}

/// Load config from a specific file path (no discovery, no env overrides).
pub fn load_config_file(path: &Path) -> Result<ClientConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    ClientConfig::from_toml(&contents)
}

/// Save configuration to a file.
///
/// Creates parent directories if they don't exist.
pub fn save_config(config: &ClientConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteFile {
            path: parent.display().to_string(),
            source: e,
        })?;
    }

    let contents = config.to_toml()?;
    std::fs::write(path, contents).map_err(|e| ConfigError::WriteFile {
        path: path.display().to_string(),
        source: e,
    })?;

    Ok(())
}

/// Get the default client config file path.
pub fn xdg_config_path() -> Option<PathBuf> {
    xdg_config_dir().map(|d| d.join(CLIENT_CONFIG_FILE))
}

/// Get the config directory for the client.
///
/// Checks `OPENCODE_CLIENT_CONFIG_DIR` first, then falls back to the platform default.
pub fn xdg_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV)
        && !dir.is_empty()
    {
        return Some(PathBuf::from(dir));
    }
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_xdg_config_path_shape() {
        if let Some(p) = xdg_config_path() {
            assert!(p.ends_with("client.toml"));
        }
    }

    #[test]
    fn test_load_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("client.toml");
        fs::write(
            &path,
            r#"
base_url = "http://127.0.0.1:5000"
circuit_breaker_threshold = 2
"#,
        )
        .unwrap();

        let config = load_config_file(&path).unwrap();
        assert_eq!(config.base_url, "http://127.0.0.1:5000");
        assert_eq!(config.circuit_breaker_threshold, 2);
        assert_eq!(config.max_retry_attempts, 3);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let err = load_config_file(Path::new("/nonexistent/client.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("client.toml");
        fs::write(&path, "this is not valid toml {{{{").unwrap();

        let err = load_config_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_dir_rejects_invalid_values() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("client.toml"),
            "circuit_breaker_threshold = 0\n",
        )
        .unwrap();

        let err = load_config_from_dir(Some(dir.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("client.toml");

        let mut config = ClientConfig::with_base_url("http://127.0.0.1:7777");
        config.max_retry_attempts = 1;
        save_config(&config, &path).unwrap();

        let loaded = load_config_file(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
