use super::{heap_mb, workspace_path, Artifact, RunContext, Runner, Toolchain};
use crate::config::LanguageConfig;
use crate::error::{BuildError, SandboxError};
use crate::sandbox::Limits;
use arbiter_common::types::{ExecutionOutcome, LanguageTag};
use async_trait::async_trait;

const SOURCE_FILE: &str = "main.js";

/// Node.js. Programs read stdin themselves (`fs.readFileSync(0)`).
pub struct JavaScriptRunner {
    toolchain: Toolchain,
}

pub fn build(config: &LanguageConfig) -> Box<dyn Runner> {
    Box::new(JavaScriptRunner {
        toolchain: Toolchain::from_config(config),
    })
}

#[async_trait]
impl Runner for JavaScriptRunner {
    fn language(&self) -> &LanguageTag {
        &self.toolchain.language
    }

    async fn compile(
        &self,
        ctx: &RunContext<'_>,
        source: &str,
        limits: &Limits,
    ) -> Result<Artifact, BuildError> {
        self.toolchain.stage(ctx, source, SOURCE_FILE, None, limits).await?;
        Ok(Artifact {
            workspace: ctx.workspace.clone(),
            command: vec![
                "node".to_string(),
                format!("--max-old-space-size={}", heap_mb(limits)),
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
