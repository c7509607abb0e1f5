use super::{workspace_path, Artifact, RunContext, Runner, Toolchain};
use crate::config::LanguageConfig;
use crate::error::{BuildError, SandboxError};
use crate::sandbox::Limits;
use arbiter_common::types::{ExecutionOutcome, LanguageTag};
use async_trait::async_trait;

const SOURCE_FILE: &str = "main.rs";
const BINARY: &str = "main";

pub struct RustRunner {
    toolchain: Toolchain,
}

pub fn build(config: &LanguageConfig) -> Box<dyn Runner> {
    Box::new(RustRunner {
        toolchain: Toolchain::from_config(config),
    })
}

#[async_trait]
impl Runner for RustRunner {
    fn language(&self) -> &LanguageTag {
        &self.toolchain.language
    }

    async fn compile(
        &self,
        ctx: &RunContext<'_>,
        source: &str,
        limits: &Limits,
    ) -> Result<Artifact, BuildError> {
        let build = format!(
            "rustc --edition 2021 -O -o {} {}",
            workspace_path(BINARY),
            workspace_path(SOURCE_FILE)
        );
        self.toolchain
            .stage(ctx, source, SOURCE_FILE, Some(&build), limits)
            .await?;
        Ok(Artifact {
            workspace: ctx.workspace.clone(),
            command: vec![workspace_path(BINARY)],
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
