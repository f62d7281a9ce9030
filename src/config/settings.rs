use anyhow::Result;
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};

use super::CoreConfig;

const APP_NAME: &str = "ContextBundler";
const CONFIG_FILE: &str = "config.json";
const CACHE_FILE: &str = "mtime-cache.json";

/// Environment variable that overrides `max_workers`.
pub const MAX_WORKERS_ENV: &str = "CONTEXT_BUNDLER_MAX_WORKERS";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "contextbundler", APP_NAME)
}

/// Returns the platform-specific configuration directory for the application.
pub fn get_config_directory() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
}

/// Returns the full path to the configuration file.
pub fn get_config_file_path() -> Option<PathBuf> {
    get_config_directory().map(|dir| dir.join(CONFIG_FILE))
}

/// Default location of the persisted modification cache.
pub fn get_cache_file_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.cache_dir().join(CACHE_FILE))
}

/// Loads the configuration from `path`, or from the platform config file when `None`.
///
/// A missing file is created with defaults. A corrupted file is logged and
/// replaced by defaults in memory so startup never fails on bad settings.
/// Environment overrides are applied last.
pub fn load_config(path: Option<&Path>) -> Result<CoreConfig> {
    let config_path = match path {
        Some(p) => p.to_path_buf(),
        None => get_config_file_path()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?,
    };

    let mut config = if !config_path.exists() {
        tracing::info!(
            "Config file not found, creating default config at {:?}",
            config_path
        );
        let default_config = CoreConfig::default();
        save_config(&default_config, Some(&config_path))?;
        default_config
    } else {
        let config_content = fs::read_to_string(&config_path)?;
        match serde_json::from_str::<CoreConfig>(&config_content) {
            Ok(config) => {
                tracing::info!("Loaded config from {:?}", config_path);
                config
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to parse config file at {:?}: {}. Falling back to default config.",
                    config_path,
                    e
                );
                CoreConfig::default()
            }
        }
    };

    apply_env_overrides(&mut config);
    Ok(config)
}

/// Applies `CONTEXT_BUNDLER_MAX_WORKERS` if it holds a positive integer.
pub fn apply_env_overrides(config: &mut CoreConfig) {
    let Ok(raw) = std::env::var(MAX_WORKERS_ENV) else {
        return;
    };
    match raw.trim().parse::<usize>() {
        Ok(workers) if workers > 0 => {
            tracing::info!("Using {}={} for the worker pool.", MAX_WORKERS_ENV, workers);
            config.max_workers = workers;
        }
        _ => {
            tracing::warn!(
                "Invalid value for {}: '{}'. Using {}.",
                MAX_WORKERS_ENV,
                raw,
                config.max_workers
            );
        }
    }
}

/// Saves the configuration to `path`, or to the platform config file when `None`.
pub fn save_config(config: &CoreConfig, path: Option<&Path>) -> Result<()> {
    let config_path = match path {
        Some(p) => p.to_path_buf(),
        None => get_config_file_path()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?,
    };

    if let Some(config_dir) = config_path.parent() {
        if !config_dir.exists() {
            fs::create_dir_all(config_dir)?;
            tracing::info!("Created config directory: {:?}", config_dir);
        }
    }

    let config_json = serde_json::to_string_pretty(config)?;
    fs::write(&config_path, config_json)?;
    tracing::info!("Saved config to {:?}", config_path);
    Ok(())
}

// Platform-specific configuration paths for reference:
// macOS:   ~/Library/Application Support/com.contextbundler.ContextBundler/
// Linux:   ~/.config/contextbundler/
// Windows: %APPDATA%/contextbundler/ContextBundler/config/

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg/config.json");
        std::env::remove_var(MAX_WORKERS_ENV);

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config, CoreConfig::default());
        assert!(path.exists());
    }

    #[test]
    #[serial]
    fn test_partial_config_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "progress_interval": 3, "include_tree": false }"#).unwrap();
        std::env::remove_var(MAX_WORKERS_ENV);

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.progress_interval, 3);
        assert!(!config.include_tree);
        assert_eq!(config.tool_ignore_file, ".llmignore");
    }

    #[test]
    #[serial]
    fn test_corrupt_config_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ definitely not json").unwrap();
        std::env::remove_var(MAX_WORKERS_ENV);

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config, CoreConfig::default());
    }

    #[test]
    #[serial]
    fn test_env_override_for_max_workers() {
        let mut config = CoreConfig {
            max_workers: 2,
            ..CoreConfig::default()
        };

        std::env::set_var(MAX_WORKERS_ENV, "7");
        apply_env_overrides(&mut config);
        assert_eq!(config.max_workers, 7);

        std::env::set_var(MAX_WORKERS_ENV, "zero");
        apply_env_overrides(&mut config);
        assert_eq!(config.max_workers, 7);

        std::env::remove_var(MAX_WORKERS_ENV);
    }
}
