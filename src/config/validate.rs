// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{BuildExecError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = BuildExecError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.node, raw.stuck, raw.job))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_jobs(cfg)?;
    validate_node(cfg)?;
    validate_stuck(cfg)?;
    validate_jobs(cfg)?;
    Ok(())
}

fn ensure_has_jobs(cfg: &RawConfigFile) -> Result<()> {
    if cfg.job.is_empty() {
        return Err(BuildExecError::ConfigError(
            "config must contain at least one [job.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_node(cfg: &RawConfigFile) -> Result<()> {
    if cfg.node.executors == 0 {
        return Err(BuildExecError::ConfigError(
            "[node].executors must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.node.name.trim().is_empty() {
        return Err(BuildExecError::ConfigError(
            "[node].name must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_stuck(cfg: &RawConfigFile) -> Result<()> {
    if cfg.stuck.estimate_factor == 0 {
        return Err(BuildExecError::ConfigError(
            "[stuck].estimate_factor must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.stuck.no_estimate_limit_hours == 0 {
        return Err(BuildExecError::ConfigError(
            "[stuck].no_estimate_limit_hours must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_jobs(cfg: &RawConfigFile) -> Result<()> {
    for (name, job) in cfg.job.iter() {
        if job.abort_by.is_some() && job.abort_after_ms.is_none() {
            return Err(BuildExecError::ConfigError(format!(
                "job '{name}' sets `abort_by` without `abort_after_ms`"
            )));
        }
        if let Some(user) = &job.abort_by {
            if user.trim().is_empty() {
                return Err(BuildExecError::ConfigError(format!(
                    "job '{name}' has an empty `abort_by`"
                )));
            }
        }
    }
    Ok(())
}
