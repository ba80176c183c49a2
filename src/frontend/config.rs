use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::export::CaseTransform;
use crate::infrastructure::logging::LogFormat;

/// File name searched for by `GeneratorConfig::discover`.
pub const CONFIG_FILE: &str = "jsbridge.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid exclude pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default)]
    pub naming: NamingConfig,

    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamingConfig {
    /// Applied to member names; type names keep their declared case.
    #[serde(default)]
    pub case_transform: CaseTransform,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    #[serde(default = "default_max_diagnostics")]
    pub max_diagnostics: usize,

    #[serde(default = "default_true")]
    pub show_suggestions: bool,

    #[serde(default = "default_true")]
    pub color: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_true")]
    pub emit_source: bool,

    #[serde(default = "default_true")]
    pub emit_shapes: bool,

    #[serde(default = "default_source_file")]
    pub source_file: String,

    #[serde(default = "default_shapes_file")]
    pub shapes_file: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Classify every referenced type up front on the rayon pool.
    #[serde(default = "default_true")]
    pub parallel: bool,

    /// Type path globs treated as not exported, e.g. `app.internal.*`.
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    /// Extra filter directives, e.g. `jsbridge::codegen=trace`.
    #[serde(default)]
    pub filter: Option<String>,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            max_diagnostics: default_max_diagnostics(),
            show_suggestions: true,
            color: true,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            emit_source: true,
            emit_shapes: true,
            source_file: default_source_file(),
            shapes_file: default_shapes_file(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            exclude: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            filter: None,
        }
    }
}

fn default_true() -> bool { true }
fn default_max_diagnostics() -> usize { 100 }
fn default_source_file() -> String { "bindings.generated.js".to_string() }
fn default_shapes_file() -> String { "bindings.shape.json".to_string() }
fn default_log_level() -> String { "warn".to_string() }

impl GeneratorConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Find and load `jsbridge.toml` from the current directory or its
    /// parents, falling back to defaults.
    pub fn discover() -> Self {
        match std::env::current_dir() {
            Ok(dir) => Self::discover_from(&dir),
            Err(_) => Self::default(),
        }
    }

    pub fn discover_from(start: &Path) -> Self {
        let mut current = Some(start.to_path_buf());

        while let Some(dir) = current {
            let config_path = dir.join(CONFIG_FILE);
            if config_path.exists() {
                match Self::load(&config_path) {
                    Ok(config) => {
                        tracing::debug!(path = %config_path.display(), "loaded config");
                        return config;
                    }
                    Err(err) => tracing::warn!("ignoring {}: {}", config_path.display(), err),
                }
            }
            current = dir.parent().map(|p| p.to_path_buf());
        }

        Self::default()
    }

    /// Compiled `generation.exclude` patterns.
    pub fn exclusion_patterns(&self) -> Result<Vec<Pattern>, ConfigError> {
        self.generation
            .exclude
            .iter()
            .map(|pattern| {
                Pattern::new(pattern).map_err(|source| ConfigError::Pattern {
                    pattern: pattern.clone(),
                    source,
                })
            })
            .collect()
    }

    /// Generate default configuration file content
    pub fn generate_default() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate config"))
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}
