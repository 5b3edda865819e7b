//! Settings
//!
//! Defaults, then `wiregraph.toml` (or the file given with `--config`), then
//! `WIREGRAPH_*` environment variables, later sources winning.

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "wiregraph.toml";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// `EnvFilter` directives used when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default)]
    pub log_format: LogFormat,
    /// Graph used when a command is not given one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph: Option<PathBuf>,
    /// Triggers evaluated at once by `run`
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Keep a copy of the original file when upgrading in place
    #[serde(default = "default_backup_on_upgrade")]
    pub backup_on_upgrade: bool,
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: usize,
}

fn default_log_filter() -> String {
    "wiregraph=info,blueprint=info".to_string()
}

fn default_workers() -> usize {
    4
}

fn default_backup_on_upgrade() -> bool {
    true
}

fn default_max_call_depth() -> usize {
    256
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
            log_format: LogFormat::default(),
            graph: None,
            workers: default_workers(),
            backup_on_upgrade: default_backup_on_upgrade(),
            max_call_depth: default_max_call_depth(),
        }
    }
}

impl Settings {
    pub fn figment(file: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed("WIREGRAPH_"))
    }

    /// Load settings; a missing file just leaves the defaults in place
    pub fn load(file: Option<&Path>) -> Result<Self, figment::Error> {
        let file = file.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        Self::figment(file).extract()
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(dir.path().join("absent.toml")))
            .extract()
            .unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.workers, 4);
        assert!(settings.backup_on_upgrade);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::string(
                r#"
                log_format = "json"
                graph = "world.graph"
                workers = 8
                "#,
            ))
            .extract()
            .unwrap();
        assert_eq!(settings.log_format, LogFormat::Json);
        assert_eq!(settings.graph, Some(PathBuf::from("world.graph")));
        assert_eq!(settings.workers, 8);
        assert_eq!(settings.log_filter, default_log_filter());
    }

    #[test]
    fn test_toml_output_reads_back() {
        let settings = Settings {
            graph: Some(PathBuf::from("demo.graph")),
            ..Settings::default()
        };
        let text = settings.to_toml().unwrap();
        assert!(text.contains("log_format = \"pretty\""));
        let parsed: Settings = toml::from_str(&text).unwrap();
        assert_eq!(parsed, settings);
    }
}
