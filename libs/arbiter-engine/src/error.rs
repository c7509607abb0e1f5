use arbiter_common::types::LanguageTag;
use thiserror::Error;

/// Failures of the sandbox infrastructure itself, never of the submission.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("sandbox backend failure during {context}: {message}")]
    Backend {
        context: &'static str,
        message: String,
    },
    #[error("evaluation cancelled")]
    Cancelled,
}

impl SandboxError {
    pub fn backend(context: &'static str, err: impl std::fmt::Display) -> Self {
        SandboxError::Backend {
            context,
            message: err.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SandboxError::Cancelled)
    }
}

/// Outcome of preparing an artifact that did not produce one.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The submission does not compile; carries the compiler output.
    #[error("compilation failed")]
    Compile(String),
    #[error(transparent)]
    System(#[from] SandboxError),
}

#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("no runner registered for language `{0}`")]
    UnsupportedLanguage(LanguageTag),
    #[error("submission has no test cases")]
    EmptyTestCases,
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    #[error("worker pool is shut down")]
    PoolClosed,
}
