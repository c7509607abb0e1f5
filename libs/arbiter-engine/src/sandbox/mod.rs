/// Execution Sandbox
///
/// **Core Responsibility:**
/// Run exactly one untrusted process under hard limits and report what it did.
///
/// **Isolation contract:**
/// - No network, read-only root filesystem, ephemeral `/tmp`
/// - CPU time, wall clock, memory, output size and process count ceilings
/// - Limits are enforced by the operating environment; source text is never
///   inspected for "dangerous" content
///
/// Backends implement [`Sandbox`]/[`SandboxProcess`]. Deadline handling, kill
/// on timeout or cancellation and release of every process handle live in
/// [`run`], so every backend gets the same guarantees.
pub mod bounded;
pub mod docker;

use crate::error::SandboxError;
use arbiter_common::types::ExecutionOutcome;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use bounded::BoundedSandbox;
pub use docker::DockerSandbox;

/// Mount point of the per-submission workspace inside every process.
pub const WORKSPACE_DIR: &str = "/workspace";

/// Exit code reported when the process was killed before it could exit.
pub const KILLED_EXIT_CODE: i64 = -1;

/// SIGXCPU delivered by RLIMIT_CPU shows up as 128 + 24.
pub const CPU_LIMIT_EXIT_CODE: i64 = 152;

#[derive(Debug, Clone, PartialEq)]
pub struct Limits {
    pub cpu_time_ms: u64,
    pub wall_clock_ms: u64,
    pub memory_bytes: u64,
    pub max_output_bytes: u64,
    pub max_processes: i64,
    /// Fraction of a CPU the process may use.
    pub cpu_share: f64,
    pub no_network: bool,
    pub no_filesystem_write: bool,
}

impl Limits {
    pub fn new(cpu_time_ms: u64, wall_clock_ms: u64, memory_bytes: u64) -> Self {
        Self {
            cpu_time_ms,
            wall_clock_ms,
            memory_bytes,
            max_output_bytes: 1024 * 1024,
            max_processes: 64,
            cpu_share: 1.0,
            no_network: true,
            no_filesystem_write: true,
        }
    }

    pub fn with_cpu_share(mut self, share: f64) -> Self {
        self.cpu_share = share;
        self
    }

    pub fn with_output_bytes(mut self, bytes: u64) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    pub fn with_max_processes(mut self, count: i64) -> Self {
        self.max_processes = count;
        self
    }

    pub fn wall_clock(&self) -> Duration {
        Duration::from_millis(self.wall_clock_ms)
    }

    /// RLIMIT_CPU granularity is whole seconds.
    pub fn cpu_time_secs(&self) -> i64 {
        ((self.cpu_time_ms + 999) / 1000).max(1) as i64
    }
}

/// Handle to a per-submission scratch area shared by compile and run steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceAccess {
    ReadOnly,
    ReadWrite,
}

/// What to start inside the sandbox.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub image: String,
    pub argv: Vec<String>,
    pub workspace: Workspace,
    pub access: WorkspaceAccess,
    /// Free-form label attached to the process for operators.
    pub label: String,
}

/// Everything observed from a process that exited on its own.
#[derive(Debug, Clone, Default)]
pub struct ProcessExit {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    pub oom_killed: bool,
    pub output_truncated: bool,
}

impl ProcessExit {
    fn resource_exceeded(&self) -> bool {
        self.oom_killed || self.output_truncated || self.exit_code == CPU_LIMIT_EXIT_CODE
    }
}

#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn create_workspace(&self, owner: &str) -> Result<Workspace, SandboxError>;

    async fn remove_workspace(&self, workspace: &Workspace) -> Result<(), SandboxError>;

    /// Start a process with `stdin` as its whole standard input.
    async fn spawn(
        &self,
        spec: &ProcessSpec,
        stdin: &[u8],
        limits: &Limits,
    ) -> Result<Box<dyn SandboxProcess>, SandboxError>;
}

#[async_trait]
pub trait SandboxProcess: Send {
    fn id(&self) -> &str;

    /// Collect output until the process exits.
    async fn wait(&mut self) -> Result<ProcessExit, SandboxError>;

    /// Kill if still running and reap. Must be safe to call more than once.
    async fn release(&mut self) -> Result<(), SandboxError>;
}

/// Owns a live process and guarantees it is released.
///
/// Explicit [`ProcessGuard::release`] is the normal path. If the guard is
/// dropped first (panic, aborted future) release is scheduled on the runtime.
pub struct ProcessGuard {
    process: Option<Box<dyn SandboxProcess>>,
}

impl ProcessGuard {
    pub fn new(process: Box<dyn SandboxProcess>) -> Self {
        Self {
            process: Some(process),
        }
    }

    pub fn id(&self) -> &str {
        self.process.as_ref().map(|p| p.id()).unwrap_or("released")
    }

    async fn wait(&mut self) -> Result<ProcessExit, SandboxError> {
        match self.process.as_mut() {
            Some(process) => process.wait().await,
            None => Err(SandboxError::backend("wait", "process already released")),
        }
    }

    /// Kill and reap, giving up after `grace`.
    pub async fn release(mut self, grace: Duration) {
        if let Some(mut process) = self.process.take() {
            let id = process.id().to_string();
            match tokio::time::timeout(grace, process.release()).await {
                Ok(Ok(())) => debug!(process = %id, "Sandbox process released"),
                Ok(Err(e)) => warn!(process = %id, error = %e, "Failed to release sandbox process"),
                Err(_) => {
                    warn!(process = %id, grace_ms = grace.as_millis() as u64, "Release exceeded grace period, finishing in background");
                    spawn_release(process);
                }
            }
        }
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if let Some(process) = self.process.take() {
            spawn_release(process);
        }
    }
}

fn spawn_release(mut process: Box<dyn SandboxProcess>) {
    // Best-effort: Drop cannot await
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if let Err(e) = process.release().await {
                    warn!(process = %process.id(), error = %e, "Deferred release failed");
                }
            });
        }
        Err(_) => warn!(process = %process.id(), "No runtime available to release sandbox process"),
    }
}

enum Waited {
    Exited(Result<ProcessExit, SandboxError>),
    TimedOut,
    Cancelled,
}

/// Run one process to completion under `limits`.
///
/// - Wall clock breach: the process is killed and the outcome is `timed_out`
/// - OOM kill, CPU limit signal or output overflow: `resource_exceeded`
/// - Cancellation: the process is killed within `grace` and
///   [`SandboxError::Cancelled`] is returned
///
/// The process is released before this returns on every path.
#[tracing::instrument(skip(sandbox, spec, stdin, limits, cancel), fields(label = %spec.label, image = %spec.image))]
pub async fn run(
    sandbox: &dyn Sandbox,
    spec: &ProcessSpec,
    stdin: &str,
    limits: &Limits,
    cancel: &CancellationToken,
    grace: Duration,
) -> Result<ExecutionOutcome, SandboxError> {
    if cancel.is_cancelled() {
        return Err(SandboxError::Cancelled);
    }

    let start_time = Instant::now();
    let process = tokio::select! {
        _ = cancel.cancelled() => return Err(SandboxError::Cancelled),
        spawned = sandbox.spawn(spec, stdin.as_bytes(), limits) => spawned?,
    };
    let mut guard = ProcessGuard::new(process);
    debug!(process = %guard.id(), "Sandbox process started");

    let waited = tokio::select! {
        _ = cancel.cancelled() => Waited::Cancelled,
        res = tokio::time::timeout(limits.wall_clock(), guard.wait()) => match res {
            Ok(exit) => Waited::Exited(exit),
            Err(_) => Waited::TimedOut,
        },
    };

    // Measured before release; kill and reap time is not the program's
    let wall_time_ms = start_time.elapsed().as_millis() as u64;
    guard.release(grace).await;

    match waited {
        Waited::Exited(Ok(exit)) => {
            let resource_exceeded = exit.resource_exceeded();
            let mut stderr = exit.stderr;
            if exit.oom_killed {
                stderr.push_str("\n[Killed: memory limit exceeded]");
            } else if exit.exit_code == CPU_LIMIT_EXIT_CODE {
                stderr.push_str("\n[Killed: CPU time limit exceeded]");
            } else if exit.output_truncated {
                stderr.push_str("\n[Killed: output limit exceeded]");
            }
            Ok(ExecutionOutcome {
                stdout: exit.stdout,
                stderr,
                exit_code: exit.exit_code,
                wall_time_ms,
                timed_out: false,
                resource_exceeded,
            })
        }
        Waited::Exited(Err(e)) => Err(e),
        Waited::TimedOut => {
            warn!(wall_time_ms, limit_ms = limits.wall_clock_ms, "Sandbox process timed out");
            Ok(ExecutionOutcome {
                stdout: String::new(),
                stderr: "[Execution timed out]".to_string(),
                exit_code: KILLED_EXIT_CODE,
                wall_time_ms,
                timed_out: true,
                resource_exceeded: false,
            })
        }
        Waited::Cancelled => Err(SandboxError::Cancelled),
    }
}

/// Retry an infrastructure operation up to `retries` extra times.
///
/// Cancellation is never retried. Backoff grows linearly from 100ms.
pub async fn with_retries<T, F, Fut>(
    retries: u32,
    what: &'static str,
    mut op: F,
) -> Result<T, SandboxError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SandboxError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(SandboxError::Cancelled) => return Err(SandboxError::Cancelled),
            Err(e) if attempt < retries => {
                attempt += 1;
                warn!(operation = what, attempt, error = %e, "Sandbox failure, retrying");
                tokio::time::sleep(Duration::from_millis(100 * attempt as u64)).await;
            }
            Err(e) => return Err(e),
        }
    }
}
