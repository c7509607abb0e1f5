/// Judge Coordinator
///
/// Drives one submission through
/// `Received → Classified → Compiling → Executing → Scored → Reported`
/// with early exits to `Rejected`, `CompileError` or `SystemError`.
///
/// Whatever happens, the caller gets a complete [`EvaluationReport`] carrying
/// the submission id. The workspace and every sandbox process are released
/// before `evaluate` returns.
use crate::audit::AuditLog;
use crate::classifier::{builtin_signatures, Classifier};
use crate::config::EngineConfig;
use crate::error::{BuildError, JudgeError, SandboxError};
use crate::harness::{self, HarnessOptions};
use crate::registry::{RegisteredRunner, RunnerRegistry};
use crate::runner::RunContext;
use crate::sandbox::{self, BoundedSandbox, Sandbox, Workspace};
use crate::scoring;
use arbiter_common::types::{EvaluationReport, LanguageTag, Stage, Submission};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct JudgeSettings {
    pub partial_factor: f64,
    pub harness: HarnessOptions,
    /// How long a kill-and-reap may take before it is left to the background.
    pub kill_grace: Duration,
}

impl JudgeSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            partial_factor: config.partial_factor,
            harness: HarnessOptions {
                parallelism: config.max_parallel_cases,
                system_retries: config.system_retries,
            },
            kill_grace: Duration::from_millis(config.kill_grace_ms),
        }
    }
}

pub struct Judge {
    classifier: Classifier,
    registry: RunnerRegistry,
    sandbox: Arc<dyn Sandbox>,
    settings: JudgeSettings,
    audit: Arc<AuditLog>,
}

impl Judge {
    pub fn new(
        classifier: Classifier,
        registry: RunnerRegistry,
        sandbox: Arc<dyn Sandbox>,
        settings: JudgeSettings,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            classifier,
            registry,
            sandbox,
            settings,
            audit,
        }
    }

    /// Build a judge whose live sandbox processes are capped at `pool_size`.
    pub fn from_config(config: &EngineConfig, backend: Arc<dyn Sandbox>) -> Result<Self, JudgeError> {
        let registry = RunnerRegistry::from_config(config)?;
        let signatures = config.classifier.clone().unwrap_or_else(builtin_signatures);
        let classifier = Classifier::new(signatures, config.default_language());
        let sandbox: Arc<dyn Sandbox> = Arc::new(BoundedSandbox::new(backend, config.pool_size));
        Ok(Self::new(
            classifier,
            registry,
            sandbox,
            JudgeSettings::from_config(config),
            Arc::new(AuditLog::new(config.audit_capacity)),
        ))
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn registry(&self) -> &RunnerRegistry {
        &self.registry
    }

    #[instrument(skip_all, fields(submission_id = %submission.id))]
    pub async fn evaluate(&self, submission: Submission, cancel: CancellationToken) -> EvaluationReport {
        let started = Instant::now();
        let id = submission.id;
        self.audit.record(
            id,
            Stage::Received,
            format!(
                "{} test cases, {} bytes of source",
                submission.test_cases.len(),
                submission.source_code.len()
            ),
        );

        let language = self
            .classifier
            .resolve(submission.language_hint.as_ref(), &submission.source_code);
        let how = if submission.language_hint.is_some() { "hint" } else { "detected" };
        self.audit
            .record(id, Stage::Classified, format!("{} ({})", language, how));

        let mut report = if submission.test_cases.is_empty() {
            EvaluationReport::rejected(id, language, JudgeError::EmptyTestCases.to_string())
        } else if cancel.is_cancelled() {
            cancelled_report(id, language)
        } else {
            match self.registry.lookup(&language) {
                Ok(entry) => self.judge_with(entry, &submission, language, &cancel).await,
                Err(e) => EvaluationReport {
                    retryable: false,
                    ..EvaluationReport::system_error(id, language, e.to_string())
                },
            }
        };

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        report.finished_at = Utc::now();
        self.audit.record(
            id,
            report.stage,
            format!("{:?}, score {}", report.verdict, report.score),
        );

        info!(
            language = %report.language,
            verdict = ?report.verdict,
            score = report.score,
            points_available = submission.points_available,
            passed = report.passed_count(),
            total = report.test_results.len(),
            elapsed_ms = report.elapsed_ms,
            "Evaluation completed"
        );
        report
    }

    async fn judge_with(
        &self,
        entry: &RegisteredRunner,
        submission: &Submission,
        language: LanguageTag,
        cancel: &CancellationToken,
    ) -> EvaluationReport {
        let id = submission.id;
        let owner = id.to_string();
        let retries = self.settings.harness.system_retries;

        let workspace = match sandbox::with_retries(retries, "create workspace", || {
            self.sandbox.create_workspace(&owner)
        })
        .await
        {
            Ok(workspace) => workspace,
            Err(e) => return failed_report(id, language, e),
        };

        let guard = WorkspaceGuard::new(self.sandbox.clone(), workspace);
        let report = self
            .compile_and_run(entry, submission, language, guard.workspace(), cancel)
            .await;
        guard.release().await;
        report
    }

    async fn compile_and_run(
        &self,
        entry: &RegisteredRunner,
        submission: &Submission,
        language: LanguageTag,
        workspace: &Workspace,
        cancel: &CancellationToken,
    ) -> EvaluationReport {
        let id = submission.id;
        let retries = self.settings.harness.system_retries;
        let runner = entry.runner.as_ref();
        let ctx = RunContext {
            sandbox: self.sandbox.as_ref(),
            workspace,
            cancel,
            grace: self.settings.kill_grace,
            label: id.to_string(),
        };

        self.audit
            .record(id, Stage::Compiling, format!("workspace {}", workspace.name));
        // Ok(Err(_)) is the submission's fault and is not retried
        let (ctx_ref, source, build_limits) = (&ctx, &submission.source_code, &entry.build_limits);
        let compiled = sandbox::with_retries(retries, "compile", move || async move {
            match runner.compile(ctx_ref, source, build_limits).await {
                Ok(artifact) => Ok(Ok(artifact)),
                Err(BuildError::Compile(diagnostic)) => Ok(Err(diagnostic)),
                Err(BuildError::System(e)) => Err(e),
            }
        })
        .await;

        let artifact = match compiled {
            Ok(Ok(artifact)) => artifact,
            Ok(Err(diagnostic)) => {
                warn!(language = %language, "Compilation failed");
                return EvaluationReport::compile_error(id, language, diagnostic);
            }
            Err(e) => return failed_report(id, language, e),
        };

        self.audit.record(
            id,
            Stage::Executing,
            format!("{} test cases", submission.test_cases.len()),
        );
        let results = match harness::evaluate(
            runner,
            &ctx,
            &artifact,
            &submission.test_cases,
            &entry.run_limits,
            self.settings.harness,
        )
        .await
        {
            Ok(results) => results,
            Err(e) => return failed_report(id, language, e),
        };

        let scored = scoring::score(&results, submission.points_available, self.settings.partial_factor);
        let passed = results.iter().filter(|r| r.passed).count();
        self.audit.record(
            id,
            Stage::Scored,
            format!("{}/{} passed", passed, results.len()),
        );

        EvaluationReport {
            submission_id: id,
            language,
            verdict: scored.verdict,
            score: scored.score,
            diagnostic: format!("{}/{} test cases passed", passed, results.len()),
            test_results: results,
            stage: Stage::Reported,
            retryable: false,
            elapsed_ms: 0,
            finished_at: Utc::now(),
        }
    }
}

pub(crate) fn cancelled_report(id: Uuid, language: LanguageTag) -> EvaluationReport {
    EvaluationReport::system_error(id, language, SandboxError::Cancelled.to_string())
}

fn failed_report(id: Uuid, language: LanguageTag, error: SandboxError) -> EvaluationReport {
    if error.is_cancelled() {
        warn!(submission_id = %id, "Evaluation cancelled");
        return cancelled_report(id, language);
    }
    warn!(submission_id = %id, error = %error, "Sandbox failure, reporting system error");
    EvaluationReport::system_error(id, language, error.to_string())
}

/// Removes the workspace on every exit path, including dropped futures.
struct WorkspaceGuard {
    sandbox: Arc<dyn Sandbox>,
    workspace: Workspace,
    released: bool,
}

impl WorkspaceGuard {
    fn new(sandbox: Arc<dyn Sandbox>, workspace: Workspace) -> Self {
        Self {
            sandbox,
            workspace,
            released: false,
        }
    }

    fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    async fn release(mut self) {
        self.released = true;
        if let Err(e) = self.sandbox.remove_workspace(&self.workspace).await {
            warn!(workspace = %self.workspace.name, error = %e, "Failed to remove workspace");
        }
    }
}

impl Drop for WorkspaceGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let sandbox = self.sandbox.clone();
        let workspace = self.workspace.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = sandbox.remove_workspace(&workspace).await {
                    warn!(workspace = %workspace.name, error = %e, "Deferred workspace removal failed");
                }
            });
        }
    }
}
