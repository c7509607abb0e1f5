/// Docker sandbox backend
///
/// Every sandboxed process is one container lifetime:
/// create → attach → start → stream stdin → collect output → wait → inspect → remove.
///
/// **Container hardening:**
/// - Network disabled (`network_mode = none`)
/// - Read-only root filesystem, small tmpfs on /tmp
/// - All capabilities dropped, no-new-privileges
/// - Memory without swap, CPU share, pids limit, RLIMIT_CPU
/// - Workspace volume mounted read-write only for staging/compilation
use super::{
    Limits, ProcessExit, ProcessSpec, Sandbox, SandboxProcess, Workspace, WorkspaceAccess,
    KILLED_EXIT_CODE, WORKSPACE_DIR,
};
use crate::error::SandboxError;
use async_trait::async_trait;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions, LogOutput,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, Mount, MountTypeEnum, ResourcesUlimits};
use bollard::volume::{CreateVolumeOptions, RemoveVolumeOptions};
use bollard::Docker;
use futures_util::stream::{Stream, StreamExt};
use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const LABEL_KEY: &str = "arbiter.owner";
const TMPFS_SIZE_KB: u64 = 16 * 1024;

type OutputStream = Pin<Box<dyn Stream<Item = Result<LogOutput, bollard::errors::Error>> + Send>>;

pub struct DockerSandbox {
    docker: Docker,
    pulled: Mutex<HashSet<String>>,
}

impl DockerSandbox {
    pub fn connect() -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| SandboxError::backend("connect", e))?;
        Ok(Self::with_client(docker))
    }

    pub fn with_client(docker: Docker) -> Self {
        Self {
            docker,
            pulled: Mutex::new(HashSet::new()),
        }
    }

    /// Ensure Docker image is available (pull if needed)
    async fn ensure_image(&self, image: &str) -> Result<(), SandboxError> {
        if self.is_known_image(image) {
            return Ok(());
        }

        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image, "Image cache hit");
            self.remember_image(image);
            return Ok(());
        }

        warn!(image, "Image cache miss, pulling");
        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });
        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.map_err(|e| SandboxError::backend("image pull", e))?;
        }

        info!(image, "Image pulled");
        self.remember_image(image);
        Ok(())
    }

    fn is_known_image(&self, image: &str) -> bool {
        self.pulled
            .lock()
            .map(|set| set.contains(image))
            .unwrap_or(false)
    }

    fn remember_image(&self, image: &str) {
        if let Ok(mut set) = self.pulled.lock() {
            set.insert(image.to_string());
        }
    }

    fn container_config(spec: &ProcessSpec, limits: &Limits) -> Config<String> {
        let mount = Mount {
            target: Some(WORKSPACE_DIR.to_string()),
            source: Some(spec.workspace.name.clone()),
            typ: Some(MountTypeEnum::VOLUME),
            read_only: Some(spec.access == WorkspaceAccess::ReadOnly),
            ..Default::default()
        };

        let cpu_secs = limits.cpu_time_secs();
        let host_config = HostConfig {
            memory: Some(limits.memory_bytes as i64),
            memory_swap: Some(limits.memory_bytes as i64),
            nano_cpus: Some((limits.cpu_share * 1_000_000_000.0) as i64),
            pids_limit: Some(limits.max_processes),
            readonly_rootfs: Some(limits.no_filesystem_write),
            network_mode: limits.no_network.then(|| "none".to_string()),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            tmpfs: Some(HashMap::from([(
                "/tmp".to_string(),
                format!("rw,nosuid,size={}k", TMPFS_SIZE_KB),
            )])),
            // soft limit raises SIGXCPU, hard limit one second later is SIGKILL
            ulimits: Some(vec![ResourcesUlimits {
                name: Some("cpu".to_string()),
                soft: Some(cpu_secs),
                hard: Some(cpu_secs + 1),
            }]),
            mounts: Some(vec![mount]),
            ..Default::default()
        };

        Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.argv.clone()),
            entrypoint: Some(Vec::new()),
            working_dir: Some(WORKSPACE_DIR.to_string()),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            open_stdin: Some(true),
            stdin_once: Some(true),
            tty: Some(false),
            network_disabled: Some(limits.no_network),
            labels: Some(HashMap::from([(LABEL_KEY.to_string(), spec.label.clone())])),
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    async fn start_attached(
        &self,
        id: &str,
        stdin: Vec<u8>,
    ) -> Result<(OutputStream, JoinHandle<()>), SandboxError> {
        let AttachContainerResults { output, mut input } = self
            .docker
            .attach_container(
                id,
                Some(AttachContainerOptions::<String> {
                    stdin: Some(true),
                    stdout: Some(true),
                    stderr: Some(true),
                    stream: Some(true),
                    logs: Some(true),
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| SandboxError::backend("attach", e))?;

        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| SandboxError::backend("start", e))?;

        // A program that never reads stdin must not block output collection
        let stdin_task = tokio::spawn(async move {
            if let Err(e) = input.write_all(&stdin).await {
                debug!(error = %e, "stdin closed early");
            }
            let _ = input.shutdown().await;
        });

        Ok((output, stdin_task))
    }
}

/// Removes a created container unless disarmed. Covers futures dropped
/// between create and the process handle being returned.
struct PendingContainer {
    docker: Docker,
    id: Option<String>,
}

impl PendingContainer {
    fn disarm(mut self) -> String {
        self.id.take().unwrap_or_default()
    }
}

impl Drop for PendingContainer {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            let docker = self.docker.clone();
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(e) = force_remove(&docker, &id).await {
                        warn!(container = %id, error = %e, "Failed to remove abandoned container");
                    }
                });
            }
        }
    }
}

async fn force_remove(docker: &Docker, id: &str) -> Result<(), SandboxError> {
    let options = RemoveContainerOptions {
        force: true,
        ..Default::default()
    };
    match docker.remove_container(id, Some(options)).await {
        Ok(()) => Ok(()),
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        }) => Ok(()),
        Err(e) => Err(SandboxError::backend("remove", e)),
    }
}

#[async_trait]
impl Sandbox for DockerSandbox {
    async fn create_workspace(&self, owner: &str) -> Result<Workspace, SandboxError> {
        let name = format!("arbiter-ws-{}", uuid::Uuid::new_v4());
        let labels = HashMap::from([(LABEL_KEY, owner)]);
        self.docker
            .create_volume(CreateVolumeOptions {
                name: name.as_str(),
                driver: "local",
                labels,
                ..Default::default()
            })
            .await
            .map_err(|e| SandboxError::backend("create workspace", e))?;
        debug!(workspace = %name, owner, "Workspace volume created");
        Ok(Workspace { name })
    }

    async fn remove_workspace(&self, workspace: &Workspace) -> Result<(), SandboxError> {
        match self
            .docker
            .remove_volume(&workspace.name, Some(RemoveVolumeOptions { force: true }))
            .await
        {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(SandboxError::backend("remove workspace", e)),
        }
    }

    async fn spawn(
        &self,
        spec: &ProcessSpec,
        stdin: &[u8],
        limits: &Limits,
    ) -> Result<Box<dyn SandboxProcess>, SandboxError> {
        self.ensure_image(&spec.image).await?;

        let name = format!("arbiter-{}", uuid::Uuid::new_v4());
        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.as_str(),
                    platform: None,
                }),
                Self::container_config(spec, limits),
            )
            .await
            .map_err(|e| SandboxError::backend("create container", e))?;

        let pending = PendingContainer {
            docker: self.docker.clone(),
            id: Some(created.id.clone()),
        };

        // On error `pending` drops and removes the container
        let (output, stdin_task) = self.start_attached(&created.id, stdin.to_vec()).await?;
        let id = pending.disarm();

        Ok(Box::new(DockerProcess {
            docker: self.docker.clone(),
            id,
            output: Some(output),
            stdin_task: Some(stdin_task),
            max_output_bytes: limits.max_output_bytes as usize,
            released: false,
        }))
    }
}

pub struct DockerProcess {
    docker: Docker,
    id: String,
    output: Option<OutputStream>,
    stdin_task: Option<JoinHandle<()>>,
    max_output_bytes: usize,
    released: bool,
}

/// Exit code and OOM flag of a stopped container.
async fn exit_state(docker: &Docker, id: &str) -> Result<(i64, bool), SandboxError> {
    let mut wait = docker.wait_container(
        id,
        Some(WaitContainerOptions {
            condition: "not-running",
        }),
    );
    while let Some(result) = wait.next().await {
        match result {
            Ok(_) => {}
            // Non-zero exits surface as errors here; the code is read from inspect below
            Err(bollard::errors::Error::DockerContainerWaitError { .. }) => {}
            Err(e) => return Err(SandboxError::backend("wait", e)),
        }
    }

    let inspect = docker
        .inspect_container(id, None)
        .await
        .map_err(|e| SandboxError::backend("inspect", e))?;
    let state = inspect.state.unwrap_or_default();
    Ok((
        state.exit_code.unwrap_or(KILLED_EXIT_CODE),
        state.oom_killed.unwrap_or(false),
    ))
}

#[async_trait]
impl SandboxProcess for DockerProcess {
    fn id(&self) -> &str {
        &self.id
    }

    async fn wait(&mut self) -> Result<ProcessExit, SandboxError> {
        let mut output = self
            .output
            .take()
            .ok_or_else(|| SandboxError::backend("wait", "output already consumed"))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut output_truncated = false;

        while let Some(chunk) = output.next().await {
            let (buf, message) = match chunk {
                Ok(LogOutput::StdOut { message }) => (&mut stdout, message),
                Ok(LogOutput::StdErr { message }) => (&mut stderr, message),
                Ok(_) => continue,
                Err(e) => return Err(SandboxError::backend("read output", e)),
            };
            buf.extend_from_slice(&message);
            if stdout.len() + stderr.len() > self.max_output_bytes {
                output_truncated = true;
                break;
            }
        }

        if output_truncated {
            stdout.truncate(self.max_output_bytes);
            stderr.truncate(self.max_output_bytes.saturating_sub(stdout.len()));
            return Ok(ProcessExit {
                stdout: String::from_utf8_lossy(&stdout).into_owned(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
                exit_code: KILLED_EXIT_CODE,
                oom_killed: false,
                output_truncated,
            });
        }

        // Owned handles: the output stream makes `&DockerProcess` non-Send
        let (docker, id) = (self.docker.clone(), self.id.clone());
        let (exit_code, oom_killed) = exit_state(&docker, &id).await?;
        Ok(ProcessExit {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code,
            oom_killed,
            output_truncated,
        })
    }

    async fn release(&mut self) -> Result<(), SandboxError> {
        if self.released {
            return Ok(());
        }
        if let Some(task) = self.stdin_task.take() {
            task.abort();
        }
        self.output = None;
        // force removal kills a running container first
        force_remove(&self.docker, &self.id).await?;
        self.released = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send<T: Send>(_: &T) {}

    // Compile-time check: waiting on a container must not pin the process handle
    #[test]
    fn test_exit_state_future_is_send() {
        fn check(process: &DockerProcess) {
            let (docker, id) = (process.docker.clone(), process.id.clone());
            let wait = exit_state(&docker, &id);
            assert_send(&wait);
        }
        let _ = check;
    }
}
