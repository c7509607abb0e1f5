// Admission control for sandbox processes
use super::{Limits, ProcessExit, ProcessSpec, Sandbox, SandboxProcess, Workspace};
use crate::error::SandboxError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Caps the number of live processes across every submission.
///
/// A permit is taken before the inner sandbox spawns and is only returned when
/// the process handle itself is dropped, which happens after release.
pub struct BoundedSandbox {
    inner: Arc<dyn Sandbox>,
    slots: Arc<Semaphore>,
}

impl BoundedSandbox {
    pub fn new(inner: Arc<dyn Sandbox>, max_live_processes: usize) -> Self {
        Self {
            inner,
            slots: Arc::new(Semaphore::new(max_live_processes)),
        }
    }

    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }
}

struct BoundedProcess {
    inner: Box<dyn SandboxProcess>,
    _permit: OwnedSemaphorePermit,
}

#[async_trait]
impl SandboxProcess for BoundedProcess {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn wait(&mut self) -> Result<ProcessExit, SandboxError> {
        self.inner.wait().await
    }

    async fn release(&mut self) -> Result<(), SandboxError> {
        self.inner.release().await
    }
}

#[async_trait]
impl Sandbox for BoundedSandbox {
    async fn create_workspace(&self, owner: &str) -> Result<Workspace, SandboxError> {
        self.inner.create_workspace(owner).await
    }

    async fn remove_workspace(&self, workspace: &Workspace) -> Result<(), SandboxError> {
        self.inner.remove_workspace(workspace).await
    }

    async fn spawn(
        &self,
        spec: &ProcessSpec,
        stdin: &[u8],
        limits: &Limits,
    ) -> Result<Box<dyn SandboxProcess>, SandboxError> {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| SandboxError::backend("admission", e))?;
        let inner = self.inner.spawn(spec, stdin, limits).await?;
        Ok(Box::new(BoundedProcess {
            inner,
            _permit: permit,
        }))
    }
}
