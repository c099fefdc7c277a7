// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::exec::StuckPolicy;
use crate::types::{JobMode, JobOutcome};

/// Configuration exactly as read from a TOML file, before validation.
///
/// ```toml
/// [node]
/// name = "local"
/// executors = 2
///
/// [stuck]
/// estimate_factor = 10
/// no_estimate_limit_hours = 24
///
/// [job.compile]
/// duration_ms = 1500
/// estimated_ms = 1000
///
/// [job.deploy]
/// duration_ms = 60000
/// mode = "async"
/// abort_after_ms = 2000
/// abort_by = "alice"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub node: NodeSection,

    #[serde(default)]
    pub stuck: StuckSection,

    /// Keys are job names.
    #[serde(default)]
    pub job: BTreeMap<String, JobConfig>,
}

/// Validated configuration. Built from [`RawConfigFile`] via `TryFrom`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub node: NodeSection,
    pub stuck: StuckSection,
    pub job: BTreeMap<String, JobConfig>,
}

impl ConfigFile {
    /// Assemble without validation; callers go through `TryFrom`.
    pub(crate) fn new_unchecked(
        node: NodeSection,
        stuck: StuckSection,
        job: BTreeMap<String, JobConfig>,
    ) -> Self {
        Self { node, stuck, job }
    }
}

/// `[node]` section: the single node jobs run on.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeSection {
    #[serde(default = "default_node_name")]
    pub name: String,

    /// Number of executor slots.
    #[serde(default = "default_executors")]
    pub executors: usize,
}

fn default_node_name() -> String {
    "built-in".to_string()
}

fn default_executors() -> usize {
    2
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            name: default_node_name(),
            executors: default_executors(),
        }
    }
}

/// `[stuck]` section: thresholds of the "likely stuck" heuristic.
#[derive(Debug, Clone, Deserialize)]
pub struct StuckSection {
    #[serde(default = "default_estimate_factor")]
    pub estimate_factor: u32,

    #[serde(default = "default_no_estimate_limit_hours")]
    pub no_estimate_limit_hours: u64,
}

fn default_estimate_factor() -> u32 {
    10
}

fn default_no_estimate_limit_hours() -> u64 {
    24
}

impl Default for StuckSection {
    fn default() -> Self {
        Self {
            estimate_factor: default_estimate_factor(),
            no_estimate_limit_hours: default_no_estimate_limit_hours(),
        }
    }
}

impl StuckSection {
    pub fn policy(&self) -> StuckPolicy {
        StuckPolicy {
            estimate_factor: self.estimate_factor,
            no_estimate_limit: Duration::from_secs(self.no_estimate_limit_hours * 60 * 60),
        }
    }
}

/// `[job.<name>]` section: a simulated build.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobConfig {
    /// How long the job body runs before concluding.
    #[serde(default)]
    pub duration_ms: u64,

    /// Estimate reported to progress and stuck detection.
    #[serde(default)]
    pub estimated_ms: Option<u64>,

    #[serde(default)]
    pub outcome: JobOutcome,

    #[serde(default)]
    pub mode: JobMode,

    /// Interrupt the job this long after it was queued.
    #[serde(default)]
    pub abort_after_ms: Option<u64>,

    /// User recorded as the cause of that interruption.
    #[serde(default)]
    pub abort_by: Option<String>,
}

impl JobConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    pub fn estimate(&self) -> Option<Duration> {
        self.estimated_ms.map(Duration::from_millis)
    }

    pub fn abort_after(&self) -> Option<Duration> {
        self.abort_after_ms.map(Duration::from_millis)
    }
}
