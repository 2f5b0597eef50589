use config::{Environment, File};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use crate::logging::LogLevel;

fn default_model_name() -> String {
    "gpt-4o".to_string()
}

fn default_interface() -> String {
    "openai".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    3000
}

fn default_timeout() -> u64 {
    600
}

fn default_max_concurrent_chapters() -> usize {
    3
}

fn default_min_chapters() -> usize {
    5
}

fn default_max_chapters() -> usize {
    11
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_level() -> String {
    "debug".to_string()
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),
    #[error("failed to create directory `{path}`: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum OutputLanguage {
    #[default]
    #[serde(rename = "pt-BR")]
    Portuguese,
    #[serde(rename = "en-US")]
    English,
}

impl OutputLanguage {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Portuguese => "pt-BR",
            Self::English => "en-US",
        }
    }

    /// Name used inside prompts ("write in ...").
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Portuguese => "Brazilian Portuguese",
            Self::English => "English",
        }
    }
}

impl fmt::Display for OutputLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for OutputLanguage {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "pt-BR" => Ok(Self::Portuguese),
            "en-US" => Ok(Self::English),
            other => Err(format!(
                "unsupported language `{other}`, expected `pt-BR` or `en-US`"
            )),
        }
    }
}

/// Process-wide settings, built once and handed to every component.
///
/// Keys mirror the environment variable names in lowercase, so
/// `MAX_CONCURRENT_CHAPTERS=5` lands in `max_concurrent_chapters`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default)]
    pub openai_base_url: String,
    #[serde(default = "default_interface")]
    pub llm_interface: String,
    #[serde(default = "default_model_name")]
    pub model_name: String,
    #[serde(default = "default_temperature")]
    pub openai_temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub frequency_penalty: f32,
    #[serde(default)]
    pub presence_penalty: f32,
    #[serde(default = "default_timeout")]
    pub llm_timeout: u64,
    #[serde(default = "default_max_concurrent_chapters")]
    pub max_concurrent_chapters: usize,
    #[serde(default = "default_min_chapters")]
    pub min_chapters: usize,
    #[serde(default = "default_max_chapters")]
    pub max_chapters: usize,
    #[serde(default)]
    pub review_chapters: bool,
    #[serde(default)]
    pub serper_api_key: Option<String>,
    #[serde(default)]
    pub default_language: OutputLanguage,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub export_pdf: bool,
    #[serde(default)]
    pub export_epub: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            openai_api_key: String::new(),
            openai_base_url: String::new(),
            llm_interface: default_interface(),
            model_name: default_model_name(),
            openai_temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            llm_timeout: default_timeout(),
            max_concurrent_chapters: default_max_concurrent_chapters(),
            min_chapters: default_min_chapters(),
            max_chapters: default_max_chapters(),
            review_chapters: false,
            serper_api_key: None,
            default_language: OutputLanguage::default(),
            output_dir: default_output_dir(),
            backup_dir: None,
            logs_dir: default_logs_dir(),
            log_file: None,
            log_level: default_log_level(),
            export_pdf: false,
            export_epub: false,
        }
    }
}

impl Settings {
    /// Loads defaults, then the optional config file, then the process
    /// environment, and validates the result.
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        Self::from_sources(config_file, Environment::default())
    }

    /// Same as [`Settings::load`] but with an explicit set of variables in place
    /// of the process environment.
    pub fn from_vars<I, K, V>(config_file: Option<&Path>, vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: config::Map<String, String> = vars
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        Self::from_sources(config_file, Environment::default().source(Some(map)))
    }

    fn from_sources(
        config_file: Option<&Path>,
        environment: Environment,
    ) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = config_file {
            builder = builder.add_source(File::from(path).required(true));
        }
        let settings: Settings = builder
            .add_source(environment.try_parsing(true))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.openai_api_key.trim().is_empty() && self.llm_interface != "ollama" {
            return Err(ConfigError::invalid(
                "OPENAI_API_KEY",
                "must be set (environment or config file)",
            ));
        }
        if self.model_name.trim().is_empty() {
            return Err(ConfigError::invalid("MODEL_NAME", "must not be empty"));
        }
        if !(0.0..=2.0).contains(&self.openai_temperature) {
            return Err(ConfigError::invalid(
                "OPENAI_TEMPERATURE",
                format!("{} is outside 0.0..=2.0", self.openai_temperature),
            ));
        }
        if self.max_concurrent_chapters == 0 {
            return Err(ConfigError::invalid(
                "MAX_CONCURRENT_CHAPTERS",
                "must be at least 1",
            ));
        }
        if self.min_chapters == 0 || self.min_chapters > self.max_chapters {
            return Err(ConfigError::invalid(
                "MIN_CHAPTERS",
                format!(
                    "must be between 1 and MAX_CHAPTERS ({}), got {}",
                    self.max_chapters, self.min_chapters
                ),
            ));
        }
        self.log_level
            .parse::<LogLevel>()
            .map_err(|reason| ConfigError::invalid("LOG_LEVEL", reason))?;
        Ok(())
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.backup_dir
            .clone()
            .unwrap_or_else(|| self.output_dir.join("backup"))
    }

    pub fn log_file(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| self.logs_dir.join("app.log"))
    }

    pub fn log_level(&self) -> LogLevel {
        self.log_level.parse().unwrap_or(LogLevel::Debug)
    }

    pub fn serper_api_key(&self) -> Option<&str> {
        self.serper_api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        for dir in [self.output_dir.clone(), self.backup_dir(), self.logs_dir.clone()] {
            fs::create_dir_all(&dir).map_err(|source| ConfigError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }
}
