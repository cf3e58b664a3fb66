use std::path::{Path, PathBuf};
use std::time::Duration;

mod error;
pub mod resolve;
pub mod verify;

pub use error::HarnessError;
pub use resolve::{list_candidates, resolve_instances, CandidateSet};
pub use verify::{verify_output, Markers, VerificationOutcome};

pub const DOMAIN_EXTENSION: &str = "hddl";
pub const PROBLEM_EXTENSIONS: &[&str] = &["hddl", "pddl"];
pub const DOMAIN_KEYWORD: &str = "domain";
pub const CANONICAL_DOMAIN_FILE: &str = "domain.hddl";
pub const DOMAIN_SUFFIX: &str = "-domain.hddl";

pub const PLAN_VERIFICATION_FLAG: &str = "-vp=1";
pub const DEFAULT_VERIFIED_MARKER: &str = "Plan has been verified by pandaPIparser";
pub const DEFAULT_PLAN_LENGTH_MARKER: &str = "End of solution plan. (counted length of";

/// One catalog entry: a directory of HDDL/PDDL files and how many of its
/// problems the run samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchmarkSpec {
    pub directory: PathBuf,
    pub instance_cap: usize,
}

impl BenchmarkSpec {
    pub fn new(directory: impl Into<PathBuf>, instance_cap: usize) -> Self {
        Self {
            directory: directory.into(),
            instance_cap,
        }
    }

    /// Last path component, used in every log line about this benchmark.
    pub fn name(&self) -> String {
        self.directory
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| self.directory.display().to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProblemInstance {
    pub domain_file: PathBuf,
    pub problem_file: PathBuf,
}

impl ProblemInstance {
    pub fn problem_name(&self) -> String {
        file_name_lossy(&self.problem_file)
    }

    pub fn domain_name(&self) -> String {
        file_name_lossy(&self.domain_file)
    }
}

fn file_name_lossy(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// How a planner child stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    Signaled(i32),
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub termination: Termination,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ExecutionResult {
    /// Signed status in the conventional form: the exit code for a normal
    /// exit, `-signal` for a signalled child, `None` when the harness killed
    /// it on timeout.
    pub fn exit_code(&self) -> Option<i32> {
        match self.termination {
            Termination::Exited(code) => Some(code),
            Termination::Signaled(signal) => Some(-signal),
            Termination::TimedOut => None,
        }
    }

    pub fn was_killed_by_signal(&self) -> bool {
        matches!(self.termination, Termination::Signaled(_))
    }

    pub fn timed_out(&self) -> bool {
        self.termination == Termination::TimedOut
    }

    pub fn duration_seconds(&self) -> f64 {
        self.duration.as_secs_f64()
    }

    /// Maps every non-successful termination onto its fatal error.
    pub fn require_success(&self, timeout: Duration) -> Result<(), HarnessError> {
        match self.termination {
            Termination::Exited(0) => Ok(()),
            Termination::Exited(code) => Err(HarnessError::PlannerFailed { code }),
            Termination::Signaled(signal) => Err(HarnessError::KilledBySignal { signal }),
            Termination::TimedOut => Err(HarnessError::Timeout { limit: timeout }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunTally {
    pub instances_checked: usize,
    pub elapsed: Duration,
}

impl RunTally {
    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }
}

#[derive(Debug, Clone)]
pub struct InstanceReport {
    pub problem_file: PathBuf,
    pub plan_size: u64,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct BenchmarkReport {
    pub name: String,
    pub instances: Vec<InstanceReport>,
    pub elapsed: Duration,
}

/// Seconds rounded to two decimals, the precision every summary line uses.
pub fn round_seconds(duration: Duration) -> f64 {
    (duration.as_secs_f64() * 100.0).round() / 100.0
}
