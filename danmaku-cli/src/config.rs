//! Engine configuration file handling.
//!
//! The file is plain TOML mirroring [`EngineConfig`]; every key is optional.
//! Without `--config` the CLI looks for `danmaku/config.toml` in the user's
//! config directory and falls back to the defaults.

use danmaku::EngineConfig;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::Result;

pub struct AppConfig;

impl AppConfig {
    /// Default location of the config file.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("danmaku").join("config.toml"))
    }

    /// Load and validate the engine configuration.
    pub fn load(path: Option<&Path>) -> Result<EngineConfig> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => path,
                None => {
                    debug!("No config file, using defaults");
                    return Ok(EngineConfig::default());
                }
            },
        };

        let content = fs::read_to_string(&path)?;
        let config = Self::parse(&content)?;
        debug!(path = %path.display(), "Loaded engine config");
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<EngineConfig> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render a configuration as TOML.
    pub fn show(config: &EngineConfig) -> Result<String> {
        Ok(toml::to_string_pretty(config)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use danmaku::{SaturationPolicy, SlideSpeed};

    #[test]
    fn test_parse_partial_file() {
        let config = AppConfig::parse(
            r#"
life_time = 4.0
same_limit = 2

[screen]
width = 1280.0
height = 720.0

[saturation]
mode = "delay"
max_delay = 1.5

[slide_speed]
mode = "linear"
base = 120.0
per_width = 0.5
"#,
        )
        .unwrap();
        assert_eq!(config.life_time, 4.0);
        assert_eq!(config.same_limit, 2);
        assert_eq!(config.screen.width, 1280.0);
        assert_eq!(
            config.saturation,
            SaturationPolicy::Delay { max_delay: 1.5 }
        );
        assert_eq!(
            config.slide_speed,
            SlideSpeed::Linear {
                base: 120.0,
                per_width: 0.5
            }
        );
        assert_eq!(config.line_height, EngineConfig::default().line_height);
    }

    #[test]
    fn test_parse_rejects_invalid_values() {
        assert!(AppConfig::parse("life_time = -1.0").is_err());
        assert!(AppConfig::parse("life_time = \"long\"").is_err());
    }

    #[test]
    fn test_show_round_trips() {
        let shown = AppConfig::show(&EngineConfig::default()).unwrap();
        let parsed = AppConfig::parse(&shown).unwrap();
        assert_eq!(parsed, EngineConfig::default());
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "font_size = 30.0\n").unwrap();
        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.font_size, 30.0);
        assert!(AppConfig::load(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
