//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from TOML and carries the
//! tool overrides, command defaults and preview layout settings. Every
//! section defaults sensibly so an empty file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::Error;

/// Default number of stderr lines kept for diagnostics.
pub const DEFAULT_STDERR_LINES: usize = 100;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tools: ToolsConfig,
    pub command: CommandConfig,
    pub preview: PreviewConfig,
}

impl Config {
    /// Deserialize a `Config` from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| Error::Config(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_toml(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        for (name, path) in [
            ("tools.ffmpeg_path", &self.tools.ffmpeg_path),
            ("tools.ffprobe_path", &self.tools.ffprobe_path),
        ] {
            if let Some(p) = path {
                if !p.exists() {
                    warnings.push(format!(
                        "{name} {} does not exist; PATH lookup will be used",
                        p.display()
                    ));
                }
            }
        }

        if self.command.stderr_lines == 0 {
            warnings.push(format!(
                "command.stderr_lines is 0; {DEFAULT_STDERR_LINES} will be used"
            ));
        }

        let p = &self.preview;
        if p.width == 0 || p.height == 0 {
            warnings.push("preview.width and preview.height must be non-zero".into());
        }
        if p.width_align == 0 || p.height_align == 0 {
            warnings.push("preview alignment of 0 is treated as 1".into());
        }
        if p.delta <= 0.0 {
            warnings.push("preview.delta must be positive".into());
        } else if p.delta > p.duration {
            warnings.push(format!(
                "preview.delta ({}) is larger than preview.duration ({}); only one frame will be tiled",
                p.delta, p.duration
            ));
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Paths to external CLI tools. Unset paths are resolved from `PATH`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
}

/// Defaults applied to every command built by the application.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    /// Capacity of the stderr ring buffer attached to every command.
    pub stderr_lines: usize,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            stderr_lines: DEFAULT_STDERR_LINES,
        }
    }
}

/// Preview layout and cut range.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Target width of the rendered strip in pixels.
    pub width: u32,
    /// Target height budget in pixels.
    pub height: u32,
    /// Tile widths are rounded down to a multiple of this.
    pub width_align: u32,
    /// Tile heights are rounded down to a multiple of this.
    pub height_align: u32,
    /// Start offset in seconds; negative counts from the end.
    pub offset: f64,
    /// Seconds between tiled frames.
    pub delta: f64,
    /// Length of the previewed range in seconds.
    pub duration: f64,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 800,
            width_align: 1,
            height_align: 1,
            offset: 0.0,
            delta: 1.0,
            duration: 5.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.tools.ffmpeg_path.is_none());
        assert_eq!(cfg.command.stderr_lines, 100);
        assert_eq!(cfg.preview.width, 1280);
        assert_eq!(cfg.preview.duration, 5.0);
    }

    #[test]
    fn default_config_no_warnings() {
        let cfg = Config::default();
        let warnings = cfg.validate();
        assert!(warnings.is_empty(), "unexpected warnings: {:?}", warnings);
    }

    #[test]
    fn missing_tool_override_warns() {
        let mut cfg = Config::default();
        cfg.tools.ffmpeg_path = Some(PathBuf::from("/nonexistent/ffmpeg"));
        let warnings = cfg.validate();
        assert!(warnings.iter().any(|w| w.contains("tools.ffmpeg_path")));
    }

    #[test]
    fn delta_larger_than_duration_warns() {
        let mut cfg = Config::default();
        cfg.preview.delta = 10.0;
        let warnings = cfg.validate();
        assert!(warnings.iter().any(|w| w.contains("preview.delta")));
    }

    #[test]
    fn zero_stderr_lines_warns() {
        let mut cfg = Config::default();
        cfg.command.stderr_lines = 0;
        assert!(cfg.validate().iter().any(|w| w.contains("stderr_lines")));
    }

    #[test]
    fn parse_toml_config() {
        let toml = r#"
            [command]
            stderr_lines = 20

            [preview]
            width = 640
            delta = 0.5
        "#;
        let cfg = Config::from_toml(toml).unwrap();
        assert_eq!(cfg.command.stderr_lines, 20);
        assert_eq!(cfg.preview.width, 640);
        assert_eq!(cfg.preview.delta, 0.5);
        assert_eq!(cfg.preview.height, 800);
    }

    #[test]
    fn parse_empty_toml_uses_defaults() {
        let cfg = Config::from_toml("").unwrap();
        assert_eq!(cfg.command.stderr_lines, 100);
    }

    #[test]
    fn parse_invalid_toml_is_config_error() {
        let err = Config::from_toml("[preview\nwidth = ").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn load_or_default_with_none() {
        let cfg = Config::load_or_default(None);
        assert_eq!(cfg.preview.width, 1280);
    }

    #[test]
    fn load_or_default_with_missing_file() {
        let cfg = Config::load_or_default(Some(Path::new("/nonexistent/ffpreview.toml")));
        assert_eq!(cfg.preview.width, 1280);
    }

    #[test]
    fn load_or_default_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ffpreview.toml");
        std::fs::write(&path, "[tools]\nffmpeg_path = \"/opt/ffmpeg/bin/ffmpeg\"\n").unwrap();
        let cfg = Config::load_or_default(Some(&path));
        assert_eq!(
            cfg.tools.ffmpeg_path,
            Some(PathBuf::from("/opt/ffmpeg/bin/ffmpeg"))
        );
    }
}
