use anyhow::{Context, Result};
use plancheck_core::{
    list_candidates, resolve_instances, round_seconds, verify_output, BenchmarkReport,
    ExecutionResult, HarnessError, InstanceReport, ProblemInstance, RunTally, VerificationOutcome,
};
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub mod config;
pub mod limits;
pub mod process;
#[cfg(test)]
mod test_support;

pub use config::{
    default_config_yaml, load_config, load_config_or_default, parse_config, write_default_config,
    ConfigOverrides, ConfigSource, HarnessConfig, DEFAULT_CONFIG_FILE,
};
use limits::{BestEffort, ChildLimit, MemoryCeiling};
use process::{shell_join, PlannerCommand};

const STDERR_TAIL_LINES: usize = 20;

/// Runs the planner for one instance. The orchestrator only sees this seam.
pub trait PlannerBackend {
    fn execute(&self, instance: &ProblemInstance) -> Result<ExecutionResult, HarnessError>;
}

/// Real backend: spawns the planner under the timeout and memory ceiling.
pub struct ProcessBackend {
    command: PlannerCommand,
    timeout: Duration,
    limit: Option<ChildLimit>,
}

impl ProcessBackend {
    pub fn new(command: PlannerCommand, timeout: Duration, limit: Option<ChildLimit>) -> Self {
        Self {
            command,
            timeout,
            limit,
        }
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        let mut command = config.planner.clone();
        if command.ensure_plan_verification() {
            info!("Automatically added the option '-vp=1' to verify the plan");
        }
        let ceiling = MemoryCeiling::from_gigabytes(config.memory_limit_gb);
        let limit = match limits::prepare(ceiling) {
            BestEffort::Applied(limit) => {
                debug!("planner address space limited to {}", limit.ceiling());
                Some(limit)
            }
            BestEffort::Skipped { reason } => {
                warn!("Failed to set memory limit, running unprotected: {}", reason);
                None
            }
        };
        Self::new(command, config.timeout, limit)
    }

    pub fn command(&self) -> &PlannerCommand {
        &self.command
    }
}

impl PlannerBackend for ProcessBackend {
    fn execute(&self, instance: &ProblemInstance) -> Result<ExecutionResult, HarnessError> {
        let argv = self.command.render(instance);
        info!("{}", shell_join(&argv));
        process::run_bounded(&argv, self.timeout, self.limit.as_ref())
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub tally: RunTally,
    pub benchmarks: Vec<BenchmarkReport>,
}

/// First failure of a run. `tally` counts the instances verified before it.
#[derive(Debug)]
pub struct RunAborted {
    pub benchmark: String,
    pub problem: Option<String>,
    pub error: HarnessError,
    pub tally: RunTally,
}

impl fmt::Display for RunAborted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.problem {
            Some(problem) => write!(
                f,
                "Benchmark {} is NOK, Problem {}: {}",
                self.benchmark, problem, self.error
            ),
            None => write!(f, "Benchmark {} is NOK: {}", self.benchmark, self.error),
        }
    }
}

impl std::error::Error for RunAborted {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

pub struct Orchestrator<'a, B> {
    config: &'a HarnessConfig,
    backend: B,
}

impl<'a, B: PlannerBackend> Orchestrator<'a, B> {
    pub fn new(config: &'a HarnessConfig, backend: B) -> Self {
        Self { config, backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Benchmarks in catalog order, instances in sorted order; stops at the
    /// first failure without touching anything after it.
    pub fn run(&self) -> Result<RunSummary, RunAborted> {
        let started = Instant::now();
        let mut tally = RunTally::default();
        let total = self.config.benchmarks.len();
        let mut reports = Vec::with_capacity(total);

        for (idx, spec) in self.config.benchmarks.iter().enumerate() {
            let name = spec.name();
            info!("Test benchmark {} ({}/{})", name, idx + 1, total);
            let benchmark_started = Instant::now();
            let abort = |problem: Option<String>, error: HarnessError, tally: RunTally| RunAborted {
                benchmark: name.clone(),
                problem,
                error,
                tally: RunTally {
                    elapsed: started.elapsed(),
                    ..tally
                },
            };

            let instances = resolve_instances(spec).map_err(|error| abort(None, error, tally))?;
            let mut instance_reports = Vec::with_capacity(instances.len());
            for instance in &instances {
                let report = self
                    .check_instance(instance)
                    .map_err(|error| abort(Some(instance.problem_name()), error, tally))?;
                tally.instances_checked += 1;
                instance_reports.push(report);
            }

            let elapsed = benchmark_started.elapsed();
            info!("Benchmark {} is OK (done in {} s)", name, round_seconds(elapsed));
            reports.push(BenchmarkReport {
                name,
                instances: instance_reports,
                elapsed,
            });
        }

        tally.elapsed = started.elapsed();
        info!(
            "All the tests are OK (Check {} problems) (done in {} s)",
            tally.instances_checked,
            round_seconds(tally.elapsed)
        );
        Ok(RunSummary {
            tally,
            benchmarks: reports,
        })
    }

    fn check_instance(&self, instance: &ProblemInstance) -> Result<InstanceReport, HarnessError> {
        let result = self.backend.execute(instance)?;
        let outcome = self.judge(&result).map_err(|err| {
            if let Some(tail) = stderr_tail(&result.stderr, STDERR_TAIL_LINES) {
                warn!("planner stderr (last {} lines):\n{}", tail.lines().count(), tail);
            }
            err
        })?;
        debug!(
            "Problem {}: size of the plan {} ({:.2} s)",
            instance.problem_name(),
            outcome.plan_size,
            result.duration_seconds()
        );
        Ok(InstanceReport {
            problem_file: instance.problem_file.clone(),
            plan_size: outcome.plan_size,
            duration: result.duration,
        })
    }

    fn judge(&self, result: &ExecutionResult) -> Result<VerificationOutcome, HarnessError> {
        result.require_success(self.config.timeout)?;
        verify_output(&result.stdout, &self.config.markers)?.require_verified()
    }
}

/// Last `max_lines` non-empty lines of the planner's stderr, if it wrote any.
fn stderr_tail(stderr: &str, max_lines: usize) -> Option<String> {
    let lines = stderr
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>();
    if lines.is_empty() {
        return None;
    }
    Some(lines[lines.len().saturating_sub(max_lines)..].join("\n"))
}

/// Runs the configured catalog against the real planner.
pub fn run_harness(config: &HarnessConfig) -> Result<RunSummary, RunAborted> {
    Orchestrator::new(config, ProcessBackend::from_config(config)).run()
}

#[derive(Debug, Clone)]
pub struct BenchmarkDescription {
    pub name: String,
    pub directory: PathBuf,
    pub available: usize,
    pub domains: Vec<String>,
    pub instances: Vec<ProblemInstance>,
}

/// Resolves every benchmark without running the planner.
pub fn describe_catalog(config: &HarnessConfig) -> Result<Vec<BenchmarkDescription>> {
    config
        .benchmarks
        .iter()
        .map(|spec| -> Result<BenchmarkDescription> {
            let name = spec.name();
            let candidates = list_candidates(&spec.directory)
                .with_context(|| format!("benchmark {}", name))?;
            let instances =
                resolve_instances(spec).with_context(|| format!("benchmark {}", name))?;
            Ok(BenchmarkDescription {
                name,
                directory: candidates.directory,
                available: candidates.problems.len(),
                domains: candidates.domains,
                instances,
            })
        })
        .collect()
}
