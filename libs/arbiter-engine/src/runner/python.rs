use super::{workspace_path, Artifact, RunContext, Runner, Toolchain};
use crate::config::LanguageConfig;
use crate::error::{BuildError, SandboxError};
use crate::sandbox::Limits;
use arbiter_common::types::{ExecutionOutcome, LanguageTag};
use async_trait::async_trait;

const SOURCE_FILE: &str = "main.py";

pub struct PythonRunner {
    toolchain: Toolchain,
}

pub fn build(config: &LanguageConfig) -> Box<dyn Runner> {
    Box::new(PythonRunner {
        toolchain: Toolchain::from_config(config),
    })
}

#[async_trait]
impl Runner for PythonRunner {
    fn language(&self) -> &LanguageTag {
        &self.toolchain.language
    }

    /// Interpreted: the source is staged as-is, nothing is compiled.
    async fn compile(
        &self,
        ctx: &RunContext<'_>,
        source: &str,
        limits: &Limits,
    ) -> Result<Artifact, BuildError> {
        self.toolchain.stage(ctx, source, SOURCE_FILE, None, limits).await?;
        Ok(Artifact {
            workspace: ctx.workspace.clone(),
            // -B: the workspace is read-only at run time, skip .pyc writes
            command: vec![
                "python3".to_string(),
                "-B".to_string(),
                "-u".to_string(),
                workspace_path(SOURCE_FILE),
            ],
        })
    }

    async fn execute(
        &self,
        ctx: &RunContext<'_>,
        artifact: &Artifact,
        input: &str,
        limits: &Limits,
    ) -> Result<ExecutionOutcome, SandboxError> {
        self.toolchain.run(ctx, &artifact.command, input, limits).await
    }
}
