use std::path::PathBuf;
use std::time::Duration;

/// Every condition that stops a regression run. None of them is recoverable.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("cannot list benchmark directory {}: {source}", path.display())]
    ListBenchmark {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("domain file is not found for problem {problem} in benchmark {benchmark}")]
    DomainNotFound { benchmark: String, problem: String },
    #[error("failed to start planner {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("TIMEOUT ({}s)", limit.as_secs())]
    Timeout { limit: Duration },
    #[error("likely killed due to memory limit (signal {signal})")]
    KilledBySignal { signal: i32 },
    #[error("planner exited with code {code}")]
    PlannerFailed { code: i32 },
    #[error("the plan has not been verified")]
    NotVerified,
    #[error("cannot parse plan length from {token:?}")]
    PlanSizeUnparsable { token: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
