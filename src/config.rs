//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;
use crate::llm::retry::RetryPolicy;

/// Pipeline tuning knobs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Similarity at or above this classifies a candidate as a duplicate.
    pub similarity_threshold: f32,
    /// Candidates below this confidence never leave the extractor.
    pub min_confidence: f32,
    /// Timeout for a single inference request.
    pub inference_timeout: Duration,
    /// Retry policy for inference calls.
    pub extract_retry: RetryPolicy,
    /// Retry policy for tracker-mutating calls.
    pub publish_retry: RetryPolicy,
    /// A window closes once it holds this many utterances.
    pub max_window_utterances: usize,
    /// A window closes once its utterances span more than this.
    pub max_window_span: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            min_confidence: 0.5,
            inference_timeout: Duration::from_secs(60),
            extract_retry: RetryPolicy::default(),
            publish_retry: RetryPolicy::default(),
            max_window_utterances: 50,
            max_window_span: Duration::from_secs(30 * 60),
        }
    }
}

impl PipelineConfig {
    /// Validate threshold ranges. Invalid values are a startup failure.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::InvalidValue {
                key: "similarity_threshold".into(),
                message: format!("{} is outside [0, 1]", self.similarity_threshold),
            });
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ConfigError::InvalidValue {
                key: "min_confidence".into(),
                message: format!("{} is outside [0, 1]", self.min_confidence),
            });
        }
        if self.max_window_utterances == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_window_utterances".into(),
                message: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// The tracker's allowed value enumerations plus fallback defaults.
///
/// The classifier guarantees every published ticket uses values from
/// these lists, so an empty list is a fatal configuration error.
#[derive(Debug, Clone)]
pub struct AllowedValues {
    pub issue_types: Vec<String>,
    pub priorities: Vec<String>,
    pub default_issue_type: String,
    pub default_priority: String,
}

impl AllowedValues {
    /// Standard Jira company-managed project values.
    pub fn jira_defaults() -> Self {
        Self {
            issue_types: vec![
                "Task".into(),
                "Story".into(),
                "Bug".into(),
                "Epic".into(),
            ],
            priorities: vec![
                "Highest".into(),
                "High".into(),
                "Medium".into(),
                "Low".into(),
                "Lowest".into(),
            ],
            default_issue_type: "Task".into(),
            default_priority: "Medium".into(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issue_types.is_empty() {
            return Err(ConfigError::EmptyAllowedValues {
                kind: "issue type".into(),
            });
        }
        if self.priorities.is_empty() {
            return Err(ConfigError::EmptyAllowedValues {
                kind: "priority".into(),
            });
        }
        Ok(())
    }

    /// Case-insensitive lookup returning the canonical casing.
    pub fn canonical_issue_type(&self, name: &str) -> Option<&str> {
        canonical(&self.issue_types, name)
    }

    /// Case-insensitive lookup returning the canonical casing.
    pub fn canonical_priority(&self, name: &str) -> Option<&str> {
        canonical(&self.priorities, name)
    }
}

fn canonical<'a>(values: &'a [String], name: &str) -> Option<&'a str> {
    let wanted = name.trim();
    values
        .iter()
        .find(|v| v.eq_ignore_ascii_case(wanted))
        .map(|v| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn out_of_range_threshold_rejected() {
        let config = PipelineConfig {
            similarity_threshold: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_window_size_rejected() {
        let config = PipelineConfig {
            max_window_utterances: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_issue_types_rejected() {
        let allowed = AllowedValues {
            issue_types: vec![],
            ..AllowedValues::jira_defaults()
        };
        assert!(allowed.validate().is_err());
    }

    #[test]
    fn canonical_lookup_ignores_case() {
        let allowed = AllowedValues::jira_defaults();
        assert_eq!(allowed.canonical_issue_type("bug"), Some("Bug"));
        assert_eq!(allowed.canonical_priority("HIGH"), Some("High"));
        assert_eq!(allowed.canonical_issue_type("incident"), None);
    }
}
