//! Startup configuration: defaults, then an optional JSON file, then
//! environment overrides. Built once and passed by reference.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use session_store::{default_history_dir, ExportFormat};
use thiserror::Error;

use crate::runners::DEFAULT_RUNNER_ID;
use crate::sections::ExpandThreshold;

pub const STATE_DIR_NAME: &str = ".orbiton";
pub const CONFIG_FILE_NAME: &str = "config.json";

pub const CONFIG_PATH_ENV: &str = "ORBITON_CONFIG_PATH";
pub const HISTORY_DIR_ENV: &str = "ORBITON_HISTORY_DIR";
pub const AUTO_SAVE_ENV: &str = "ORBITON_AUTO_SAVE";
pub const AUTO_SAVE_INTERVAL_ENV: &str = "ORBITON_AUTO_SAVE_INTERVAL";
pub const EXPAND_MAX_LINES_ENV: &str = "ORBITON_EXPAND_MAX_LINES";
pub const EXPAND_MAX_CHARS_ENV: &str = "ORBITON_EXPAND_MAX_CHARS";
pub const EXPORT_FORMAT_ENV: &str = "ORBITON_EXPORT_FORMAT";
pub const CONTEXT_MAX_TOKENS_ENV: &str = "ORBITON_CONTEXT_MAX_TOKENS";
pub const RUNNER_ENV: &str = "ORBITON_RUNNER";

const DEFAULT_AUTO_SAVE_INTERVAL_SECS: u64 = 60;
const DEFAULT_CONTEXT_MAX_TOKENS: usize = 8_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine the home directory")]
    NoHomeDirectory,

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Owns the log file and the default config file.
    pub state_dir: PathBuf,
    pub history_dir: PathBuf,
    pub auto_save: bool,
    pub auto_save_interval: Duration,
    pub expand_threshold: ExpandThreshold,
    pub export_format: ExportFormat,
    pub context_max_tokens: usize,
    pub runner: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    history_dir: Option<PathBuf>,
    auto_save: Option<bool>,
    auto_save_interval_secs: Option<u64>,
    expand_threshold: Option<ExpandThreshold>,
    export_format: Option<ExportFormat>,
    context_max_tokens: Option<usize>,
    runner: Option<String>,
}

impl Config {
    /// Built-in defaults rooted at `home`.
    #[must_use]
    pub fn defaults(home: &Path) -> Self {
        Self {
            state_dir: home.join(STATE_DIR_NAME),
            history_dir: default_history_dir(home),
            auto_save: true,
            auto_save_interval: Duration::from_secs(DEFAULT_AUTO_SAVE_INTERVAL_SECS),
            expand_threshold: ExpandThreshold::default(),
            export_format: ExportFormat::Markdown,
            context_max_tokens: DEFAULT_CONTEXT_MAX_TOKENS,
            runner: DEFAULT_RUNNER_ID.to_string(),
        }
    }

    /// Loads from the user's home directory and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDirectory)?;
        let lookup = |key: &str| std::env::var(key).ok();

        let config_file = match non_blank(lookup(CONFIG_PATH_ENV)) {
            Some(path) => Some(PathBuf::from(path)),
            None => {
                let default_path = home.join(STATE_DIR_NAME).join(CONFIG_FILE_NAME);
                default_path.is_file().then_some(default_path)
            }
        };

        Self::from_sources(&home, config_file.as_deref(), lookup)
    }

    /// Layers `config_file` (which must exist when given) and then `env`
    /// over the defaults.
    pub fn from_sources(
        home: &Path,
        config_file: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::defaults(home);
        if let Some(path) = config_file {
            config.apply_file(path)?;
        }
        config.apply_env(env)?;
        Ok(config)
    }

    /// Human-readable key/value pairs for `/config`.
    #[must_use]
    pub fn describe(&self) -> Vec<(&'static str, String)> {
        vec![
            ("state_dir", self.state_dir.display().to_string()),
            ("history_dir", self.history_dir.display().to_string()),
            ("auto_save", self.auto_save.to_string()),
            (
                "auto_save_interval_secs",
                self.auto_save_interval.as_secs().to_string(),
            ),
            (
                "expand_threshold",
                format!(
                    "{} lines / {} chars",
                    self.expand_threshold.max_lines, self.expand_threshold.max_chars
                ),
            ),
            ("export_format", self.export_format.extension().to_string()),
            ("context_max_tokens", self.context_max_tokens.to_string()),
            ("runner", self.runner.clone()),
        ]
    }

    /// One value from [`describe`](Self::describe), by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.describe()
            .into_iter()
            .find_map(|(name, value)| (name == key).then_some(value))
    }

    fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ConfigFile = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(history_dir) = file.history_dir {
            self.history_dir = history_dir;
        }
        if let Some(auto_save) = file.auto_save {
            self.auto_save = auto_save;
        }
        if let Some(secs) = file.auto_save_interval_secs {
            self.auto_save_interval = interval("auto_save_interval_secs", secs)?;
        }
        if let Some(threshold) = file.expand_threshold {
            self.expand_threshold = threshold;
        }
        if let Some(format) = file.export_format {
            self.export_format = format;
        }
        if let Some(tokens) = file.context_max_tokens {
            self.context_max_tokens = positive("context_max_tokens", tokens)?;
        }
        if let Some(runner) = file.runner {
            self.runner = runner;
        }
        Ok(())
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let var = |key: &str| non_blank(env(key));

        if let Some(dir) = var(HISTORY_DIR_ENV) {
            self.history_dir = PathBuf::from(dir);
        }
        if let Some(value) = var(AUTO_SAVE_ENV) {
            self.auto_save = parse_flag(AUTO_SAVE_ENV, &value)?;
        }
        if let Some(value) = var(AUTO_SAVE_INTERVAL_ENV) {
            let secs = parse_number(AUTO_SAVE_INTERVAL_ENV, &value)?;
            self.auto_save_interval = interval(AUTO_SAVE_INTERVAL_ENV, secs)?;
        }
        if let Some(value) = var(EXPAND_MAX_LINES_ENV) {
            self.expand_threshold.max_lines = parse_number(EXPAND_MAX_LINES_ENV, &value)?;
        }
        if let Some(value) = var(EXPAND_MAX_CHARS_ENV) {
            self.expand_threshold.max_chars = parse_number(EXPAND_MAX_CHARS_ENV, &value)?;
        }
        if let Some(value) = var(EXPORT_FORMAT_ENV) {
            self.export_format =
                value
                    .parse()
                    .map_err(|reason| ConfigError::InvalidValue {
                        key: EXPORT_FORMAT_ENV,
                        value: value.clone(),
                        reason,
                    })?;
        }
        if let Some(value) = var(CONTEXT_MAX_TOKENS_ENV) {
            let tokens = parse_number(CONTEXT_MAX_TOKENS_ENV, &value)?;
            self.context_max_tokens = positive(CONTEXT_MAX_TOKENS_ENV, tokens)?;
        }
        if let Some(runner) = var(RUNNER_ENV) {
            self.runner = runner;
        }
        Ok(())
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
            reason: "expected 1/0, true/false, yes/no or on/off".to_string(),
        }),
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|error: T::Err| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
        reason: error.to_string(),
    })
}

fn positive(key: &'static str, value: usize) -> Result<usize, ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

fn interval(key: &'static str, secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::InvalidValue {
            key,
            value: secs.to_string(),
            reason: "must be at least one second".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}
