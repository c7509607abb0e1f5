pub mod audit;
pub mod classifier;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod harness;
pub mod pool;
pub mod registry;
pub mod runner;
pub mod sandbox;
pub mod scoring;

pub use audit::{AuditEntry, AuditLog};
pub use classifier::{Classifier, Signature};
pub use config::{EngineConfig, LanguageConfig};
pub use coordinator::{Judge, JudgeSettings};
pub use error::{BuildError, JudgeError, SandboxError};
pub use pool::{JudgePool, WorkerSlot};
pub use registry::RunnerRegistry;
pub use sandbox::{DockerSandbox, Limits, Sandbox};
