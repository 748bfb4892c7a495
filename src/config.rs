//! Engine configuration.
//!
//! [`EngineConfig`] carries every tunable the pipeline and its default steps
//! read. It is handed to [`PipelineBuilder::config`](crate::PipelineBuilder::config)
//! and reaches steps through [`StepContext`](crate::StepContext); nothing is
//! read from globals.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{HeddleError, Result};

/// Default number of review rejections before a run fails.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default channel capacity for run events.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Tunables for the pipeline and its default steps.
///
/// Every field has a default, so a JSON document only needs the keys it
/// overrides:
///
/// ```
/// use heddle::EngineConfig;
///
/// let config = EngineConfig::from_json_str(r#"{ "max_retries": 5 }"#).unwrap();
/// assert_eq!(config.max_retries, 5);
/// assert_eq!(config.enum_suggestion_limit, 5);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Rejections allowed before the run fails with "retry limit exceeded".
    pub max_retries: u32,

    /// Example values quoted in an `enum_invalid` suggestion.
    pub enum_suggestion_limit: usize,

    /// Candidate templates shown to the completion when selecting one.
    pub candidate_prompt_limit: usize,

    /// Characters of a candidate description kept in the selection prompt.
    pub candidate_description_limit: usize,

    /// Characters of subject title/description kept in prompts.
    pub subject_text_limit: usize,

    /// Module used when neither the inputs nor the repository name one.
    pub default_module_id: String,

    /// Scenario type used when the inputs do not name one.
    pub default_scenario_type: String,

    /// Appended to the subject title to name the artifact.
    pub artifact_name_suffix: String,

    /// Capacity of the run event broadcast channel.
    pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            enum_suggestion_limit: 5,
            candidate_prompt_limit: 5,
            candidate_description_limit: 100,
            subject_text_limit: 200,
            default_module_id: "1".to_string(),
            default_scenario_type: "API".to_string(),
            artifact_name_suffix: "_auto".to_string(),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// Parses a configuration from JSON and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`HeddleError::Serialization`] for malformed JSON and
    /// [`HeddleError::Config`] for out-of-range values.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`HeddleError::Io`] if the file cannot be read, otherwise the
    /// same errors as [`from_json_str`](Self::from_json_str).
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Checks that every value is usable.
    ///
    /// # Errors
    ///
    /// Returns [`HeddleError::Config`] naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(HeddleError::Config(
                "max_retries must be at least 1".to_string(),
            ));
        }
        if self.candidate_prompt_limit == 0 {
            return Err(HeddleError::Config(
                "candidate_prompt_limit must be at least 1".to_string(),
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(HeddleError::Config(
                "event_channel_capacity must be at least 1".to_string(),
            ));
        }
        if self.default_module_id.trim().is_empty() {
            return Err(HeddleError::Config(
                "default_module_id must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Sets the retry bound.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}
