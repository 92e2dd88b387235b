use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

const CONFIG_DIR_NAME: &str = "guid-tools";
const CONFIG_FILE_NAME: &str = "config.json";

const DEFAULT_INSTRUCTION: &str = "Classify the following accounting policy text with the FRS102 \
section it relates to. Respond with the section reference and a short title, for example \
\"FRS102 Section 23 - Revenue\". If the text does not relate to any FRS102 section, respond \
with \"Not applicable\".";

const DEFAULT_SYSTEM_PROMPT: &str = "You are an expert in UK accounting standards, specifically \
FRS102. You classify accounting policy text with precise standard references.";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Error parsing config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// How the pipeline treats a flattened dataset without an identifier column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierMode {
    /// Missing identifier column is a validation error
    #[default]
    Required,
    /// Missing identifier column means every marker row is a candidate
    Optional,
}

/// Column names expected in the flattened dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputColumns {
    pub identifier: String,
    pub sheet: String,
    pub row: String,
    pub col_ref: String,
    pub formula: String,
    pub cell_value: String,
}

impl Default for InputColumns {
    fn default() -> Self {
        Self {
            identifier: "GUID".to_string(),
            sheet: "Sheet".to_string(),
            row: "RowNum".to_string(),
            col_ref: "ColRef".to_string(),
            formula: "Formula Text".to_string(),
            cell_value: "CellValue".to_string(),
        }
    }
}

/// Everything the classification pipeline needs to know up front
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Column reference that marks a row as classifiable
    pub target_column: String,
    pub max_formula_length: usize,
    pub batch_size: usize,
    pub delay_between_batches_seconds: f64,
    pub request_timeout_seconds: u64,
    pub default_classification_on_error: String,

    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub api_base_url: String,

    pub instruction_text: String,
    pub system_prompt: String,
    /// Glossary of named ranges, included in a prompt when the formula mentions them
    pub named_ranges: BTreeMap<String, String>,

    pub columns: InputColumns,
    pub classification_column: String,
    pub error_column: String,
    pub identifier_mode: IdentifierMode,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            target_column: "D".to_string(),
            max_formula_length: 5000,
            batch_size: 5,
            delay_between_batches_seconds: 1.0,
            request_timeout_seconds: 30,
            default_classification_on_error: "ERROR_CLASSIFICATION".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.1,
            max_tokens: 100,
            api_base_url: "https://api.openai.com/v1".to_string(),
            instruction_text: DEFAULT_INSTRUCTION.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            named_ranges: BTreeMap::new(),
            columns: InputColumns::default(),
            classification_column: "FRS102_Classification".to_string(),
            error_column: "Classification_Error".to_string(),
            identifier_mode: IdentifierMode::Required,
        }
    }
}

impl ClassifierConfig {
    /// Load from an explicit path, else the user config file if present, else defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => {
                    debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target_column.trim().is_empty() {
            return Err(ConfigError::Invalid("target_column must not be empty".into()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        if !self.delay_between_batches_seconds.is_finite() || self.delay_between_batches_seconds < 0.0 {
            return Err(ConfigError::Invalid(
                "delay_between_batches_seconds must be a non-negative number".into(),
            ));
        }
        if self.request_timeout_seconds == 0 {
            return Err(ConfigError::Invalid("request_timeout_seconds must be at least 1".into()));
        }
        if self.max_formula_length == 0 {
            return Err(ConfigError::Invalid("max_formula_length must be at least 1".into()));
        }
        if self.classification_column.trim().is_empty() || self.error_column.trim().is_empty() {
            return Err(ConfigError::Invalid("output column names must not be empty".into()));
        }
        Ok(())
    }

    pub fn batch_delay(&self) -> Duration {
        // Invalid delays are rejected by `validate`
        Duration::try_from_secs_f64(self.delay_between_batches_seconds).unwrap_or_default()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// `<config_dir>/guid-tools/config.json`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}
