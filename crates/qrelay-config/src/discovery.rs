//! Config file discovery and layered merging.
//!
//! Resolution order (later overrides earlier):
//! 1. `~/.config/qrelay/config.toml` (user config)
//! 2. `./qrelay.toml` (project-local), or the explicit `--config` file
//! 3. `QRELAY_*` environment variables
//! 4. CLI arguments (handled externally)

use std::path::{Path, PathBuf};

use crate::{ConfigError, RelayConfig, Result};

/// Default config filename for project-local config.
const PROJECT_CONFIG_FILE: &str = "qrelay.toml";

/// Default config filename within the user config directory.
const USER_CONFIG_FILE: &str = "config.toml";

/// Application name for config directory resolution.
const APP_NAME: &str = "qrelay";

/// Environment variable to override the config directory.
const CONFIG_DIR_ENV: &str = "QRELAY_CONFIG_DIR";

/// Tracks where each config layer was loaded from.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    /// Path to the config file.
    pub path: PathBuf,
    /// Whether the file was found and loaded.
    pub loaded: bool,
}

/// Result of config discovery and loading.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// The merged configuration.
    pub config: RelayConfig,
    /// Sources that were checked, in order of precedence (lowest first).
    pub sources: Vec<ConfigSource>,
    /// Discovered files that exist but could not be loaded.
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    /// Get paths of sources that were actually loaded.
    pub fn loaded_from(&self) -> Vec<&Path> {
        self.sources
            .iter()
            .filter(|s| s.loaded)
            .map(|s| s.path.as_path())
            .collect()
    }
}

/// Load configuration from every layer, including the process environment.
///
/// `explicit` replaces the project-local file; unlike discovered files it must
/// exist and parse.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    let mut loaded = load_config_with_options(explicit, None, None)?;
    loaded.config.apply_env(|name| std::env::var(name).ok());
    Ok(loaded)
}

/// Load the file layers with explicit control over where to look.
///
/// `config_dir` overrides both `QRELAY_CONFIG_DIR` and the platform default;
/// `project_dir` replaces the working directory when looking for
/// `qrelay.toml`. Environment variables are not applied.
pub fn load_config_with_options(
    explicit: Option<&Path>,
    config_dir: Option<&Path>,
    project_dir: Option<&Path>,
) -> Result<LoadedConfig> {
    let mut config = RelayConfig::default();
    let mut sources = Vec::new();
    let mut warnings = Vec::new();

    // 1. User config
    let user_config_path = match config_dir {
        Some(dir) => Some(dir.join(USER_CONFIG_FILE)),
        None => xdg_config_path(),
    };
    if let Some(path) = user_config_path {
        sources.push(load_layer(&mut config, &path, &mut warnings));
    }

    // 2. Explicit file, or project-local config
    match explicit {
        Some(path) => {
            config.merge(load_config_file(path)?);
            sources.push(ConfigSource {
                path: path.to_path_buf(),
                loaded: true,
            });
        }
        None => {
            let project_path = project_dir
                .map(|d| d.join(PROJECT_CONFIG_FILE))
                .unwrap_or_else(|| PathBuf::from(PROJECT_CONFIG_FILE));
            sources.push(load_layer(&mut config, &project_path, &mut warnings));
        }
    }

    Ok(LoadedConfig {
        config,
        sources,
        warnings,
    })
}

/// Load config from a specific file path (no discovery).
pub fn load_config_file(path: &Path) -> Result<RelayConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    RelayConfig::from_toml(&contents)
}

/// Get the user config file path.
pub fn xdg_config_path() -> Option<PathBuf> {
    xdg_config_dir().map(|d| d.join(USER_CONFIG_FILE))
}

/// Get the config directory for qrelay.
///
/// Checks `QRELAY_CONFIG_DIR` first, then falls back to the platform default.
pub fn xdg_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV)
        && !dir.is_empty()
    {
        return Some(PathBuf::from(dir));
    }
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

/// Try to load a discovered config file and merge it into `config`.
fn load_layer(config: &mut RelayConfig, path: &Path, warnings: &mut Vec<String>) -> ConfigSource {
    if !path.is_file() {
        return ConfigSource {
            path: path.to_path_buf(),
            loaded: false,
        };
    }

    match load_config_file(path) {
        Ok(layer) => {
            config.merge(layer);
            ConfigSource {
                path: path.to_path_buf(),
                loaded: true,
            }
        }
        Err(e) => {
            warnings.push(format!("Failed to load {}: {}", path.display(), e));
            ConfigSource {
                path: path.to_path_buf(),
                loaded: false,
            }
        }
    }
}
