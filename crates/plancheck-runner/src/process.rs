use crate::limits::ChildLimit;
use anyhow::{anyhow, Result};
use plancheck_core::{
    ExecutionResult, HarnessError, ProblemInstance, Termination, PLAN_VERIFICATION_FLAG,
};
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

pub const DOMAIN_PATH_PLACEHOLDER: &str = "${DOMAIN_PATH}";
pub const PROBLEM_PATH_PLACEHOLDER: &str = "${PROBLEM_PATH}";

const POLL_INTERVAL: Duration = Duration::from_millis(10);
// Lets readers pick up what the planner wrote just before its deadline.
const DRAIN_GRACE: Duration = Duration::from_millis(100);

// Pid (and process group id) of the planner currently running, 0 when idle.
static ACTIVE_PLANNER: AtomicU32 = AtomicU32::new(0);

struct ActivePlanner;

impl ActivePlanner {
    fn register(child: &Child) -> Self {
        ACTIVE_PLANNER.store(child.id(), Ordering::SeqCst);
        Self
    }
}

impl Drop for ActivePlanner {
    fn drop(&mut self) {
        ACTIVE_PLANNER.store(0, Ordering::SeqCst);
    }
}

/// Kills the in-flight planner's process group, if any. Planners run in their
/// own group, so a terminal interrupt does not reach them on its own.
pub fn terminate_active_planner() -> bool {
    let pid = ACTIVE_PLANNER.swap(0, Ordering::SeqCst);
    if pid == 0 {
        return false;
    }
    #[cfg(unix)]
    {
        if let Ok(pid) = libc::pid_t::try_from(pid) {
            // SAFETY: plain syscall; a stale group id only yields ESRCH.
            return unsafe { libc::kill(-pid, libc::SIGKILL) } == 0;
        }
    }
    false
}

/// Planner argv with `${DOMAIN_PATH}` / `${PROBLEM_PATH}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannerCommand {
    pub(crate) argv: Vec<String>,
}

impl PlannerCommand {
    pub fn new(argv: Vec<String>) -> Result<Self> {
        match argv.first() {
            Some(program) if !program.trim().is_empty() => Ok(Self { argv }),
            _ => Err(anyhow!("planner command must not be empty")),
        }
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    pub fn set_program(&mut self, program: impl Into<String>) {
        self.argv[0] = program.into();
    }

    /// Appends `-vp=1` unless an argument already carries it. Returns whether
    /// the flag was injected.
    pub fn ensure_plan_verification(&mut self) -> bool {
        if self
            .argv
            .iter()
            .any(|arg| arg.contains(PLAN_VERIFICATION_FLAG))
        {
            return false;
        }
        self.argv.push(PLAN_VERIFICATION_FLAG.to_string());
        true
    }

    pub fn render(&self, instance: &ProblemInstance) -> Vec<String> {
        let domain = instance.domain_file.to_string_lossy();
        let problem = instance.problem_file.to_string_lossy();
        self.argv
            .iter()
            .map(|part| {
                part.replace(DOMAIN_PATH_PLACEHOLDER, &domain)
                    .replace(PROBLEM_PATH_PLACEHOLDER, &problem)
            })
            .collect()
    }
}

/// Runs `argv` to completion, to its deadline, or until a signal kills it.
/// A timeout too large to represent as an instant means no deadline.
pub fn run_bounded(
    argv: &[String],
    timeout: Duration,
    limit: Option<&ChildLimit>,
) -> Result<ExecutionResult, HarnessError> {
    let program = argv.first().cloned().unwrap_or_default();
    let mut cmd = Command::new(&program);
    cmd.args(argv.get(1..).unwrap_or_default());
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    if let Some(limit) = limit {
        limit.install(&mut cmd);
    }

    let started = Instant::now();
    let deadline = started.checked_add(timeout);
    let mut child = cmd
        .spawn()
        .map_err(|source| HarnessError::Spawn { program, source })?;
    let active = ActivePlanner::register(&child);
    let stdout_reader = drain(child.stdout.take());
    let stderr_reader = drain(child.stderr.take());

    let mut termination = wait_with_deadline(&mut child, deadline)?;
    // Helpers forked by the planner must not outlive it or hold its pipes.
    kill_process_group(&mut child);
    drop(active);

    let drain_deadline = deadline.map(|deadline| deadline.max(Instant::now() + DRAIN_GRACE));
    let stdout = collect(stdout_reader, drain_deadline)?;
    let stderr = collect(stderr_reader, drain_deadline)?;
    if stdout.is_none() || stderr.is_none() {
        termination = Termination::TimedOut;
    }

    Ok(ExecutionResult {
        termination,
        stdout: stdout.unwrap_or_default(),
        stderr: stderr.unwrap_or_default(),
        duration: started.elapsed(),
    })
}

fn wait_with_deadline(
    child: &mut Child,
    deadline: Option<Instant>,
) -> Result<Termination, HarnessError> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(classify(status));
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            kill_process_group(child);
            child.wait()?;
            return Ok(Termination::TimedOut);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn classify(status: ExitStatus) -> Termination {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Termination::Signaled(signal);
        }
    }
    Termination::Exited(status.code().unwrap_or(-1))
}

// The planner may fork helpers that inherit its pipes; they share its group.
// Once the leader is reaped the group only survives through those helpers,
// and killing an empty group is a harmless ESRCH.
fn kill_process_group(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Ok(pid) = libc::pid_t::try_from(child.id()) {
            // SAFETY: plain syscall on the group created for this child.
            if unsafe { libc::kill(-pid, libc::SIGKILL) } == 0 {
                return;
            }
        }
    }
    let _ = child.kill();
}

type Reader = Option<Receiver<std::io::Result<Vec<u8>>>>;

fn drain<R: Read + Send + 'static>(stream: Option<R>) -> Reader {
    stream.map(|mut stream| {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = tx.send(stream.read_to_end(&mut buf).map(|_| buf));
        });
        rx
    })
}

/// Output of one stream, or `None` when a process outside the planner's group
/// still held the pipe open at `deadline`. The reader thread is left behind.
fn collect(reader: Reader, deadline: Option<Instant>) -> Result<Option<String>, HarnessError> {
    let Some(rx) = reader else {
        return Ok(Some(String::new()));
    };
    let received = match deadline {
        Some(deadline) => rx.recv_timeout(deadline.saturating_duration_since(Instant::now())),
        None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
    };
    let bytes = match received {
        Ok(read) => read?,
        Err(RecvTimeoutError::Timeout) => return Ok(None),
        Err(RecvTimeoutError::Disconnected) => Vec::new(),
    };
    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}

pub fn shell_join(parts: &[String]) -> String {
    parts
        .iter()
        .map(|p| shell_quote(p))
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        "''".to_string()
    } else if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./:=".contains(c))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::{prepare, BestEffort, MemoryCeiling};
    use std::path::PathBuf;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    fn instance() -> ProblemInstance {
        ProblemInstance {
            domain_file: PathBuf::from("/bench/Rover/domain.hddl"),
            problem_file: PathBuf::from("/bench/Rover/p01.hddl"),
        }
    }

    fn template(parts: &[&str]) -> PlannerCommand {
        PlannerCommand::new(parts.iter().map(|p| p.to_string()).collect()).expect("command")
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(PlannerCommand::new(Vec::new()).is_err());
        assert!(PlannerCommand::new(vec![" ".to_string()]).is_err());
    }

    #[test]
    fn render_substitutes_both_placeholders() {
        let command = template(&["./build/treerex", "${DOMAIN_PATH}", "${PROBLEM_PATH}", "-po"]);
        assert_eq!(
            command.render(&instance()),
            vec![
                "./build/treerex",
                "/bench/Rover/domain.hddl",
                "/bench/Rover/p01.hddl",
                "-po"
            ]
        );
    }

    #[test]
    fn plan_verification_flag_is_injected_once() {
        let mut command = template(&["planner", "${DOMAIN_PATH}", "${PROBLEM_PATH}"]);
        assert!(command.ensure_plan_verification());
        assert!(!command.ensure_plan_verification());
        assert_eq!(command.argv().last().map(String::as_str), Some("-vp=1"));
        assert_eq!(command.argv().len(), 4);

        let mut explicit = template(&["planner", "-vp=1", "${DOMAIN_PATH}"]);
        assert!(!explicit.ensure_plan_verification());
        assert_eq!(explicit.argv().len(), 3);
    }

    #[test]
    fn captures_output_and_exit_code() {
        let result = run_bounded(
            &sh("echo planned; echo oops >&2; exit 3"),
            Duration::from_secs(10),
            None,
        )
        .expect("run");
        assert_eq!(result.termination, Termination::Exited(3));
        assert_eq!(result.stdout, "planned\n");
        assert_eq!(result.stderr, "oops\n");
        assert!(!result.timed_out());
    }

    #[test]
    fn sleeping_child_times_out() {
        let started = Instant::now();
        let result = run_bounded(&sh("sleep 5"), Duration::from_millis(300), None).expect("run");
        assert!(result.timed_out());
        assert_eq!(result.exit_code(), None);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn timeout_kills_forked_helpers_holding_the_pipes() {
        let started = Instant::now();
        let result = run_bounded(
            &sh("sleep 5 & sleep 5; wait"),
            Duration::from_millis(300),
            None,
        )
        .expect("run");
        assert!(result.timed_out());
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn background_helper_does_not_outlive_the_planner() {
        let started = Instant::now();
        let result = run_bounded(
            &sh("echo done; sleep 5 & exit 0"),
            Duration::from_millis(300),
            None,
        )
        .expect("run");
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(result.termination, Termination::Exited(0));
        assert_eq!(result.stdout, "done\n");
    }

    #[test]
    fn unrepresentable_timeout_means_no_deadline() {
        let result = run_bounded(
            &sh("echo ok"),
            Duration::from_secs(u64::MAX),
            None,
        )
        .expect("run");
        assert_eq!(result.termination, Termination::Exited(0));
        assert_eq!(result.stdout, "ok\n");
    }

    #[test]
    fn reader_past_deadline_is_a_timeout() {
        let (tx, rx) = mpsc::channel::<std::io::Result<Vec<u8>>>();
        let deadline = Instant::now() + Duration::from_millis(50);
        assert_eq!(collect(Some(rx), Some(deadline)).expect("collect"), None);
        drop(tx);
    }

    #[cfg(unix)]
    #[test]
    fn signal_is_distinct_from_exit_code() {
        let result = run_bounded(&sh("kill -9 $$"), Duration::from_secs(10), None).expect("run");
        assert_eq!(result.termination, Termination::Signaled(9));
        assert!(result.was_killed_by_signal());
        assert_eq!(result.exit_code(), Some(-9));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn memory_ceiling_applies_to_planner_child() {
        let limit = match prepare(MemoryCeiling::from_gigabytes(2)) {
            BestEffort::Applied(limit) => limit,
            BestEffort::Skipped { .. } => return,
        };
        let result = run_bounded(&sh("ulimit -v"), Duration::from_secs(10), Some(&limit))
            .expect("run");
        assert_eq!(result.termination, Termination::Exited(0));
        assert_eq!(result.stdout.trim(), (2u64 * 1024 * 1024).to_string());
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let err = run_bounded(
            &["/nonexistent/plancheck-planner".to_string()],
            Duration::from_secs(1),
            None,
        )
        .expect_err("spawn should fail");
        assert!(matches!(err, HarnessError::Spawn { .. }));
    }

    #[test]
    fn shell_join_quotes_only_when_needed() {
        let parts = vec![
            "./build/treerex".to_string(),
            "/a b/domain.hddl".to_string(),
            "-vp=1".to_string(),
        ];
        assert_eq!(shell_join(&parts), "./build/treerex '/a b/domain.hddl' -vp=1");
    }
}
