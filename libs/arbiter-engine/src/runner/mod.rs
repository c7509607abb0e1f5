/// Runners - language-specific compile/execute capability
///
/// Each language ships its own module implementing [`Runner`]. Interpreted
/// languages stage the source into the workspace without invoking any
/// compiler; compiled languages stage and build in one sandboxed process.
/// The registry maps configured runner kinds to these implementations.
pub mod cpp;
pub mod java;
pub mod javascript;
pub mod python;
pub mod rust;

use crate::config::LanguageConfig;
use crate::error::{BuildError, SandboxError};
use crate::sandbox::{self, Limits, ProcessSpec, Sandbox, Workspace, WorkspaceAccess, WORKSPACE_DIR};
use arbiter_common::types::{ExecutionOutcome, LanguageTag};
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Compiler diagnostics beyond this are cut off in reports.
const MAX_DIAGNOSTIC_BYTES: usize = 8 * 1024;

/// Everything a runner needs from the coordinator for one submission.
pub struct RunContext<'a> {
    pub sandbox: &'a dyn Sandbox,
    pub workspace: &'a Workspace,
    pub cancel: &'a CancellationToken,
    pub grace: Duration,
    /// Submission id, attached to every process for operators.
    pub label: String,
}

/// Ready-to-run program inside a workspace.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub workspace: Workspace,
    pub command: Vec<String>,
}

#[async_trait]
pub trait Runner: Send + Sync {
    fn language(&self) -> &LanguageTag;

    async fn compile(
        &self,
        ctx: &RunContext<'_>,
        source: &str,
        limits: &Limits,
    ) -> Result<Artifact, BuildError>;

    async fn execute(
        &self,
        ctx: &RunContext<'_>,
        artifact: &Artifact,
        input: &str,
        limits: &Limits,
    ) -> Result<ExecutionOutcome, SandboxError>;
}

/// Image and identity shared by every runner implementation.
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub language: LanguageTag,
    pub image: String,
}

impl Toolchain {
    pub fn from_config(config: &LanguageConfig) -> Self {
        Self {
            language: config.tag(),
            image: config.image.clone(),
        }
    }

    fn spec(&self, ctx: &RunContext<'_>, argv: Vec<String>, access: WorkspaceAccess) -> ProcessSpec {
        ProcessSpec {
            image: self.image.clone(),
            argv,
            workspace: ctx.workspace.clone(),
            access,
            label: ctx.label.clone(),
        }
    }

    /// Write `source` to `file_name` in the workspace, then run `build` (if any)
    /// in the same process. `build` is a shell fragment run from the workspace.
    pub async fn stage(
        &self,
        ctx: &RunContext<'_>,
        source: &str,
        file_name: &str,
        build: Option<&str>,
        limits: &Limits,
    ) -> Result<(), BuildError> {
        let mut script = format!("cat > {}/{}", WORKSPACE_DIR, file_name);
        if let Some(build) = build {
            script.push_str(" && ");
            script.push_str(build);
        }
        let argv = vec!["sh".to_string(), "-c".to_string(), script];
        let spec = self.spec(ctx, argv, WorkspaceAccess::ReadWrite);

        let outcome = sandbox::run(ctx.sandbox, &spec, source, limits, ctx.cancel, ctx.grace).await?;
        if outcome.exited_cleanly() {
            return Ok(());
        }

        let mut diagnostic = if outcome.timed_out {
            format!("compilation exceeded {}ms", limits.wall_clock_ms)
        } else {
            let mut text = outcome.stderr;
            if !outcome.stdout.is_empty() {
                text.push_str(&outcome.stdout);
            }
            text
        };
        truncate_on_char_boundary(&mut diagnostic, MAX_DIAGNOSTIC_BYTES);
        Err(BuildError::Compile(diagnostic))
    }

    /// Run `command` against `input` with the workspace mounted read-only.
    pub async fn run(
        &self,
        ctx: &RunContext<'_>,
        command: &[String],
        input: &str,
        limits: &Limits,
    ) -> Result<ExecutionOutcome, SandboxError> {
        let spec = self.spec(ctx, command.to_vec(), WorkspaceAccess::ReadOnly);
        sandbox::run(ctx.sandbox, &spec, input, limits, ctx.cancel, ctx.grace).await
    }
}

fn truncate_on_char_boundary(text: &mut String, max: usize) {
    if text.len() <= max {
        return;
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text.push_str("\n[diagnostic truncated]");
}

pub(crate) fn workspace_path(file: &str) -> String {
    format!("{}/{}", WORKSPACE_DIR, file)
}

/// Memory for managed runtimes, leaving headroom below the container limit.
pub(crate) fn heap_mb(limits: &Limits) -> u64 {
    ((limits.memory_bytes / (1024 * 1024)) * 3 / 4).max(16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundary() {
        let mut text = "ééééé".to_string(); // 2 bytes each
        truncate_on_char_boundary(&mut text, 3);
        assert!(text.starts_with('é'));
        assert!(text.ends_with("[diagnostic truncated]"));

        let mut short = "ok".to_string();
        truncate_on_char_boundary(&mut short, 10);
        assert_eq!(short, "ok");
    }

    #[test]
    fn test_heap_mb_keeps_headroom() {
        assert_eq!(heap_mb(&Limits::new(1000, 1000, 256 * 1024 * 1024)), 192);
        assert_eq!(heap_mb(&Limits::new(1000, 1000, 1024)), 16);
    }
}
