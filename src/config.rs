use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "myanalyst.toml";
pub const BACKEND_URL_ENV: &str = "MYANALYST_BACKEND_URL";

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub backend_url: String,
    pub bind: String,
    pub port: u16,
    pub site_name: String,
    /// Viewport width in pixels below which the sidebar is an overlay.
    pub narrow_viewport: u32,
    pub assets_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:8080".into(),
            bind: "127.0.0.1".into(),
            port: 3000,
            site_name: "MyAnalyst".into(),
            narrow_viewport: 992,
            assets_dir: None,
        }
    }
}

/// Loads `myanalyst.toml` (or the file given with `-c`). A missing default
/// file is not an error; an unreadable or invalid one falls back to defaults
/// with a warning.
pub fn load_configuration(override_path: Option<&Path>) -> AppConfig {
    let config_path = override_path.map(|p| p.to_path_buf()).or_else(|| {
        let default = PathBuf::from(DEFAULT_CONFIG_FILE);
        default.exists().then_some(default)
    });

    let mut config = match config_path {
        Some(path) => read_configuration(&path),
        None => AppConfig::default(),
    };

    if let Ok(url) = env::var(BACKEND_URL_ENV) {
        if !url.trim().is_empty() {
            debug!("backend url taken from {BACKEND_URL_ENV}");
            config.backend_url = url.trim().to_string();
        }
    }

    config
}

fn read_configuration(path: &Path) -> AppConfig {
    let raw = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            warn!(
                "failed to read configuration at {}: {err}; using defaults",
                path.display()
            );
            return AppConfig::default();
        }
    };

    match parse_toml_config(&raw) {
        Ok(config) => {
            debug!("loaded configuration from {}", path.display());
            config
        }
        Err(err) => {
            warn!(
                "failed to parse configuration at {}: {err}; using defaults",
                path.display()
            );
            AppConfig::default()
        }
    }
}

fn parse_toml_config(raw: &str) -> Result<AppConfig, String> {
    toml::from_str::<AppConfig>(raw).map_err(|err| format!("TOML parse error: {err}"))
}
