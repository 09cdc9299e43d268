//! Property classification — normalizes suggested type and priority
//! into the tracker's allowed value sets.
//!
//! Total by construction: exact case-insensitive match, then a synonym
//! table with ordered fallback targets, then the configured default,
//! then the first allowed value. The publisher never sees an
//! out-of-domain value.

use tracing::debug;

use crate::config::AllowedValues;
use crate::pipeline::types::TicketCandidate;

/// Synonym chains for issue types. Each alias tries its targets in
/// order until one is in the allowed set.
const TYPE_ALIASES: &[(&str, &[&str])] = &[
    ("bug", &["bug", "defect", "task"]),
    ("defect", &["bug", "task"]),
    ("issue", &["bug", "task"]),
    ("incident", &["bug", "task"]),
    ("story", &["story", "task"]),
    ("feature", &["story", "new feature", "task"]),
    ("enhancement", &["story", "improvement", "task"]),
    ("improvement", &["improvement", "story", "task"]),
    ("task", &["task"]),
    ("chore", &["task"]),
    ("todo", &["task"]),
    ("epic", &["epic", "story"]),
    ("subtask", &["subtask", "sub-task", "task"]),
    ("sub-task", &["sub-task", "subtask", "task"]),
];

/// Synonym chains for priorities.
const PRIORITY_ALIASES: &[(&str, &[&str])] = &[
    ("urgent", &["highest", "high"]),
    ("critical", &["highest", "high"]),
    ("blocker", &["highest", "high"]),
    ("asap", &["highest", "high"]),
    ("p0", &["highest", "high"]),
    ("p1", &["high"]),
    ("important", &["high"]),
    ("normal", &["medium"]),
    ("default", &["medium"]),
    ("p2", &["medium"]),
    ("p3", &["low"]),
    ("minor", &["low"]),
    ("low priority", &["low"]),
    ("trivial", &["lowest", "low"]),
];

/// Normalizes candidate properties against the allowed enumerations.
pub struct PropertyClassifier {
    allowed: AllowedValues,
}

impl PropertyClassifier {
    pub fn new(allowed: AllowedValues) -> Self {
        Self { allowed }
    }

    /// Classify a candidate's suggestions into (type, priority).
    pub fn classify(&self, candidate: &TicketCandidate) -> (String, String) {
        let issue_type = self.classify_type(candidate.suggested_type.as_deref());
        let priority = self.classify_priority(candidate.suggested_priority.as_deref());
        debug!(
            suggested_type = candidate.suggested_type.as_deref().unwrap_or("-"),
            suggested_priority = candidate.suggested_priority.as_deref().unwrap_or("-"),
            issue_type = %issue_type,
            priority = %priority,
            "Classified candidate properties"
        );
        (issue_type, priority)
    }

    /// Normalize a suggested issue type to an allowed value.
    pub fn classify_type(&self, suggestion: Option<&str>) -> String {
        self.normalize(
            suggestion,
            TYPE_ALIASES,
            &self.allowed.issue_types,
            &self.allowed.default_issue_type,
        )
    }

    /// Normalize a suggested priority to an allowed value.
    pub fn classify_priority(&self, suggestion: Option<&str>) -> String {
        self.normalize(
            suggestion,
            PRIORITY_ALIASES,
            &self.allowed.priorities,
            &self.allowed.default_priority,
        )
    }

    fn normalize(
        &self,
        suggestion: Option<&str>,
        aliases: &[(&str, &[&str])],
        allowed: &[String],
        default: &str,
    ) -> String {
        if let Some(raw) = suggestion {
            let wanted = raw.trim();

            // Exact match wins, with the tracker's canonical casing.
            if let Some(canonical) = lookup(allowed, wanted) {
                return canonical.to_string();
            }

            // Synonym chain: first allowed target wins.
            let lower = wanted.to_lowercase();
            if let Some((_, targets)) = aliases.iter().find(|(alias, _)| *alias == lower) {
                for target in targets.iter() {
                    if let Some(canonical) = lookup(allowed, target) {
                        debug!(from = %wanted, to = %canonical, "Mapped via synonym table");
                        return canonical.to_string();
                    }
                }
            }
        }

        // Configured default, or the first allowed value if even the
        // default is out of domain for this tracker.
        lookup(allowed, default)
            .or_else(|| allowed.first().map(String::as_str))
            .unwrap_or(default)
            .to_string()
    }
}

fn lookup<'a>(allowed: &'a [String], name: &str) -> Option<&'a str> {
    allowed
        .iter()
        .find(|v| v.eq_ignore_ascii_case(name.trim()))
        .map(String::as_str)
}
