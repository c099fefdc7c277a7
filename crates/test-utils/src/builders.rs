#![allow(dead_code)]

use std::collections::BTreeMap;

use buildexec::config::{ConfigFile, JobConfig, NodeSection, RawConfigFile, StuckSection};
use buildexec::types::{JobMode, JobOutcome};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                node: NodeSection::default(),
                stuck: StuckSection::default(),
                job: BTreeMap::new(),
            },
        }
    }

    pub fn with_job(mut self, name: &str, job: JobConfig) -> Self {
        self.config.job.insert(name.to_string(), job);
        self
    }

    pub fn with_executors(mut self, executors: usize) -> Self {
        self.config.node.executors = executors;
        self
    }

    pub fn with_node_name(mut self, name: &str) -> Self {
        self.config.node.name = name.to_string();
        self
    }

    pub fn with_estimate_factor(mut self, factor: u32) -> Self {
        self.config.stuck.estimate_factor = factor;
        self
    }

    /// The unvalidated config, for exercising validation failures.
    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `JobConfig`.
pub struct JobConfigBuilder {
    job: JobConfig,
}

impl JobConfigBuilder {
    pub fn new(duration_ms: u64) -> Self {
        Self {
            job: JobConfig {
                duration_ms,
                ..JobConfig::default()
            },
        }
    }

    pub fn estimated_ms(mut self, ms: u64) -> Self {
        self.job.estimated_ms = Some(ms);
        self
    }

    pub fn outcome(mut self, outcome: JobOutcome) -> Self {
        self.job.outcome = outcome;
        self
    }

    pub fn asynchronous(mut self) -> Self {
        self.job.mode = JobMode::Async;
        self
    }

    pub fn abort_after_ms(mut self, ms: u64) -> Self {
        self.job.abort_after_ms = Some(ms);
        self
    }

    pub fn abort_by(mut self, user: &str) -> Self {
        self.job.abort_by = Some(user.to_string());
        self
    }

    pub fn build(self) -> JobConfig {
        self.job
    }
}
