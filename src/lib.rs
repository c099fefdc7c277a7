// src/lib.rs

pub mod cli;
pub mod clock;
pub mod config;
pub mod errors;
pub mod exec;
pub mod interrupt;
pub mod jobs;
pub mod logging;
pub mod node;
pub mod queue;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::clock::SystemClock;
use crate::config::{load_and_validate, ConfigFile};
use crate::errors::BuildExecError;
use crate::exec::{Executor, ExecutorSettings};
use crate::interrupt::InterruptionCause;
use crate::jobs::{ConfiguredJob, JobRecord};
use crate::node::Node;
use crate::queue::{BuildContext, Queue, SubTask, WorkQueue};
use crate::types::BuildResult;

const MONITOR_INTERVAL: Duration = Duration::from_secs(1);
const SETTLE_POLL: Duration = Duration::from_millis(200);

/// One submitted job and what the caller needs to report on it.
struct SubmittedBuild {
    name: String,
    context: Arc<BuildContext>,
    record: Arc<JobRecord>,
}

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the work queue and one node with its executor slots
/// - per-job abort timers
/// - a periodic progress / stuck monitor
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let mut cfg = load_and_validate(&config_path)?;
    apply_overrides(&mut cfg, &args)?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let settings = ExecutorSettings {
        clock: Arc::new(SystemClock),
        stuck: cfg.stuck.policy(),
    };
    let queue = WorkQueue::new();
    let scheduler: Arc<dyn Queue> = queue.clone();
    let node = Node::new(cfg.node.name.clone(), cfg.node.executors, scheduler, settings);
    queue.attach_node(&node);
    info!(node = %node.name(), executors = node.num_executors(), "node ready");

    // Ctrl-C: drop what is still queued, interrupt what is running.
    {
        let node = Arc::clone(&node);
        let queue = Arc::clone(&queue);
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            warn!("shutdown requested");
            let dropped = queue.clear("shutdown requested");
            debug!(dropped, "pending work dropped");
            node.interrupt_all_for_shutdown();
        });
    }

    let monitor = tokio::spawn(monitor_executors(Arc::clone(&node)));

    let runtime = Handle::current();
    let mut builds = Vec::with_capacity(cfg.job.len());
    for (name, job_cfg) in cfg.job.iter() {
        let job = Arc::new(ConfiguredJob::new(name.clone(), job_cfg.clone(), runtime.clone()));
        let record = job.record();
        let job: Arc<dyn SubTask> = job;
        let context = queue.submit(Arc::clone(&job));

        if let Some(delay) = job_cfg.abort_after() {
            tokio::spawn(abort_after(
                Arc::clone(&node),
                job,
                delay,
                job_cfg.abort_by.clone(),
            ));
        }

        builds.push(SubmittedBuild {
            name: name.clone(),
            context,
            record,
        });
    }

    let contexts: Vec<_> = builds.iter().map(|b| Arc::clone(&b.context)).collect();
    tokio::task::spawn_blocking(move || {
        for context in contexts {
            while !context.wait_until_settled(SETTLE_POLL) {}
        }
    })
    .await?;

    monitor.abort();
    print_summary(&builds);
    Ok(())
}

/// Apply command-line overrides on top of the validated config.
fn apply_overrides(cfg: &mut ConfigFile, args: &CliArgs) -> errors::Result<()> {
    if let Some(executors) = args.executors {
        cfg.node.executors = usize::from(executors);
    }

    if args.jobs.is_empty() {
        return Ok(());
    }
    if let Some(unknown) = args.jobs.iter().find(|name| !cfg.job.contains_key(*name)) {
        return Err(BuildExecError::ConfigError(format!(
            "--job {unknown}: no such job in the config"
        )));
    }
    cfg.job.retain(|name, _| args.jobs.contains(name));
    Ok(())
}

/// The executor currently holding `job`'s work unit, if any.
fn executor_running(node: &Node, job: &Arc<dyn SubTask>) -> Option<Arc<Executor>> {
    node.executors().into_iter().find(|e| {
        e.current_work_unit()
            .is_some_and(|unit| std::ptr::addr_eq(Arc::as_ptr(&unit.work), Arc::as_ptr(job)))
    })
}

async fn abort_after(
    node: Arc<Node>,
    job: Arc<dyn SubTask>,
    delay: Duration,
    user: Option<String>,
) {
    tokio::time::sleep(delay).await;

    let Some(executor) = executor_running(&node, &job) else {
        debug!(job = %job.display_name(), "abort timer fired but the job is not running");
        return;
    };

    match user {
        Some(user) => executor.abort_by(&user),
        None => executor.interrupt_with(
            BuildResult::Aborted,
            [InterruptionCause::programmatic(Some(format!(
                "timed out after {} ms",
                delay.as_millis()
            )))],
        ),
    }
}

/// Periodically log progress of busy executors and flag likely stuck ones.
async fn monitor_executors(node: Arc<Node>) {
    let mut ticker = tokio::time::interval(MONITOR_INTERVAL);
    loop {
        ticker.tick().await;
        for executor in node.executors() {
            if executor.current_executable().is_none() {
                continue;
            }
            if executor.is_likely_stuck() {
                warn!(
                    executor = %executor.name(),
                    elapsed = %executor.timestamp_string(),
                    "executor is likely stuck"
                );
            } else {
                debug!(
                    executor = %executor.name(),
                    progress = executor.progress(),
                    elapsed = %executor.timestamp_string(),
                    remaining = %executor.estimated_remaining_time_string(),
                    "executor progress"
                );
            }
        }
    }
}

fn print_summary(builds: &[SubmittedBuild]) {
    println!("buildexec summary ({} jobs):", builds.len());
    for build in builds {
        let ends = build.context.ends();
        let result = build.record.result().unwrap_or(if ends.is_empty() {
            BuildResult::NotBuilt
        } else {
            BuildResult::Failure
        });
        let elapsed = ends
            .first()
            .map(|end| exec::time_span_string(end.elapsed))
            .unwrap_or_else(|| "-".to_string());

        println!("  - {}: {result} ({elapsed})", build.name);
        if let Some(reason) = build.context.aborted() {
            println!("      error: {reason}");
        }
        for cause in build.record.causes() {
            println!("      cause: {cause}");
        }
    }
}

/// Simple dry-run output: print the node and jobs.
fn print_dry_run(cfg: &ConfigFile) {
    println!("buildexec dry-run");
    println!("  node.name = {}", cfg.node.name);
    println!("  node.executors = {}", cfg.node.executors);
    println!("  stuck.estimate_factor = {}", cfg.stuck.estimate_factor);
    println!(
        "  stuck.no_estimate_limit_hours = {}",
        cfg.stuck.no_estimate_limit_hours
    );
    println!();

    println!("jobs ({}):", cfg.job.len());
    for (name, job) in cfg.job.iter() {
        println!("  - {name}");
        println!("      duration_ms: {}", job.duration_ms);
        if let Some(estimate) = job.estimated_ms {
            println!("      estimated_ms: {estimate}");
        }
        println!("      outcome: {:?}", job.outcome);
        println!("      mode: {:?}", job.mode);
        if let Some(after) = job.abort_after_ms {
            println!("      abort_after_ms: {after}");
        }
        if let Some(ref user) = job.abort_by {
            println!("      abort_by: {user}");
        }
    }

    debug!("dry-run complete (no execution)");
}
