//! Comparator: the verdict for one story in one run

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::fingerprint::{Fingerprint, FingerprintField};
use crate::story::Story;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegressionStatus {
    /// No baseline existed; the current fingerprint became the baseline
    Created,
    Passed,
    Failed,
    /// Excluded by configuration, never captured
    Skipped,
}

impl RegressionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegressionStatus::Created => "created",
            RegressionStatus::Passed => "passed",
            RegressionStatus::Failed => "failed",
            RegressionStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for RegressionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegressionResult {
    pub story_id: String,
    pub component: String,
    pub story: String,
    pub status: RegressionStatus,
    pub current: Option<Fingerprint>,
    pub baseline: Option<Fingerprint>,
}

impl RegressionResult {
    /// Hash fields that differ between current and baseline
    pub fn changed_fields(&self) -> Vec<FingerprintField> {
        match (&self.current, &self.baseline) {
            (Some(current), Some(baseline)) => current.differences(baseline),
            _ => Vec::new(),
        }
    }

    pub fn current_visual_hash(&self) -> Option<&str> {
        self.current.as_ref().map(|f| f.visual_hash.as_str())
    }

    pub fn baseline_visual_hash(&self) -> Option<&str> {
        self.baseline.as_ref().map(|f| f.visual_hash.as_str())
    }
}

/// Decide the verdict for a freshly captured fingerprint.
///
/// Without a baseline the story is `created` and the current fingerprint is
/// reported as its baseline.
pub fn compare(story: &Story, current: Fingerprint, baseline: Option<Fingerprint>) -> RegressionResult {
    let (status, baseline) = match baseline {
        None => (RegressionStatus::Created, current.clone()),
        Some(baseline) if current.matches(&baseline) => (RegressionStatus::Passed, baseline),
        Some(baseline) => (RegressionStatus::Failed, baseline),
    };

    RegressionResult {
        story_id: story.id(),
        component: story.component_name.clone(),
        story: story.name.clone(),
        status,
        current: Some(current),
        baseline: Some(baseline),
    }
}

/// Result for a story excluded from comparison
pub fn skipped(story: &Story) -> RegressionResult {
    RegressionResult {
        story_id: story.id(),
        component: story.component_name.clone(),
        story: story.name.clone(),
        status: RegressionStatus::Skipped,
        current: None,
        baseline: None,
    }
}
