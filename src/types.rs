use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// Result recorded for a build.
///
/// Ordered from best to worst, so `max` of two results is the worse one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildResult {
    Success,
    Unstable,
    Failure,
    NotBuilt,
    Aborted,
}

impl BuildResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildResult::Success => "SUCCESS",
            BuildResult::Unstable => "UNSTABLE",
            BuildResult::Failure => "FAILURE",
            BuildResult::NotBuilt => "NOT_BUILT",
            BuildResult::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for BuildResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "success" => Ok(BuildResult::Success),
            "unstable" => Ok(BuildResult::Unstable),
            "failure" => Ok(BuildResult::Failure),
            "not_built" => Ok(BuildResult::NotBuilt),
            "aborted" => Ok(BuildResult::Aborted),
            other => Err(format!(
                "invalid build result: {other} (expected success, unstable, failure, not_built or aborted)"
            )),
        }
    }
}

/// How a configured job ends when it runs to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobOutcome {
    Success,
    Failure,
    /// The task body panics; the executor records it as a task failure.
    Panic,
}

impl Default for JobOutcome {
    fn default() -> Self {
        JobOutcome::Success
    }
}

/// Whether a configured job finishes on its worker thread or continues
/// asynchronously after the thread returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobMode {
    Sync,
    Async,
}

impl Default for JobMode {
    fn default() -> Self {
        JobMode::Sync
    }
}
