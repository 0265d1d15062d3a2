//! Configuration loading for the `ffpreview` binary.

use anyhow::{Context, Result};
use std::path::Path;

pub use fp_core::config::Config;

/// Locations searched, in order, when no config file is given.
pub const DEFAULT_CONFIG_PATHS: &[&str] = &["./ffpreview.toml", "~/.config/ffpreview/config.toml"];

/// Load configuration from a TOML file. Warnings are logged.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = Config::from_toml(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    for warning in config.validate() {
        tracing::warn!("{}: {warning}", path.display());
    }

    Ok(config)
}

/// Load config from `custom_path`, else from the first default location
/// that exists, else return the defaults.
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    for path_str in DEFAULT_CONFIG_PATHS {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            tracing::debug!("using config {}", path.display());
            return load_config(path);
        }
    }

    Ok(Config::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_path_must_exist() {
        let err = load_config_or_default(Some(Path::new("/nonexistent/ffpreview.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn explicit_path_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ffpreview.toml");
        std::fs::write(&path, "[preview]\nwidth = 640\n").unwrap();
        let config = load_config_or_default(Some(&path)).unwrap();
        assert_eq!(config.preview.width, 640);
        assert_eq!(config.preview.duration, 5.0);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[preview\n").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse config file"));
    }
}
