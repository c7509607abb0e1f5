use super::{heap_mb, Artifact, RunContext, Runner, Toolchain};
use crate::config::LanguageConfig;
use crate::error::{BuildError, SandboxError};
use crate::sandbox::{Limits, WORKSPACE_DIR};
use arbiter_common::types::{ExecutionOutcome, LanguageTag};
use async_trait::async_trait;

/// The entry class must be `Main`.
const SOURCE_FILE: &str = "Main.java";
const MAIN_CLASS: &str = "Main";

pub struct JavaRunner {
    toolchain: Toolchain,
}

pub fn build(config: &LanguageConfig) -> Box<dyn Runner> {
    Box::new(JavaRunner {
        toolchain: Toolchain::from_config(config),
    })
}

#[async_trait]
impl Runner for JavaRunner {
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
            "javac -J-Xmx{}m -encoding UTF-8 -d {dir} {dir}/{src}",
            heap_mb(limits),
            dir = WORKSPACE_DIR,
            src = SOURCE_FILE
        );
        self.toolchain
            .stage(ctx, source, SOURCE_FILE, Some(&build), limits)
            .await?;
        // Compile and run limits differ, so the run heap is sized at execute time
        Ok(Artifact {
            workspace: ctx.workspace.clone(),
            command: vec![
                "java".to_string(),
                "-XX:+UseSerialGC".to_string(),
                "-Xss64m".to_string(),
                "-cp".to_string(),
                WORKSPACE_DIR.to_string(),
                MAIN_CLASS.to_string(),
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
        let mut command = artifact.command.clone();
        command.insert(1, format!("-Xmx{}m", heap_mb(limits)));
        self.toolchain.run(ctx, &command, input, limits).await
    }
}
