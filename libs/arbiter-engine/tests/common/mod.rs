// Scripted in-memory sandbox for exercising the judge without Docker.
//
// Staged sources decide how "programs" behave, by marker comment:
//   `# sleep`  never exits
//   `# crash`  exits 1
//   `# oom`    killed by the memory limit
//   `# double` prints twice the integer on stdin
//   `# slow`   echoes stdin after 20ms
//   otherwise  echoes stdin
// A build step fails when the source contains `COMPILE_ERROR`.
#![allow(dead_code)]

use arbiter_common::types::{LanguageTag, Submission, TestCase};
use arbiter_engine::sandbox::{Limits, ProcessExit, ProcessSpec, Sandbox, SandboxProcess, Workspace};
use arbiter_engine::{EngineConfig, Judge, SandboxError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use uuid::Uuid;

pub fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

#[derive(Default)]
pub struct Counters {
    pub spawned: AtomicUsize,
    pub live: AtomicUsize,
    pub max_live: AtomicUsize,
    pub killed: AtomicUsize,
    pub workspaces: AtomicUsize,
}

#[derive(Default)]
pub struct FakeSandbox {
    pub counters: Arc<Counters>,
    staged: Mutex<HashMap<String, String>>,
    fail_spawns: AtomicUsize,
}

impl FakeSandbox {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The next `n` spawns fail as infrastructure errors.
    pub fn fail_next_spawns(&self, n: usize) {
        self.fail_spawns.store(n, Ordering::SeqCst);
    }

    pub fn spawned(&self) -> usize {
        self.counters.spawned.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.counters.live.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.counters.max_live.load(Ordering::SeqCst)
    }

    pub fn killed(&self) -> usize {
        self.counters.killed.load(Ordering::SeqCst)
    }

    pub fn live_workspaces(&self) -> usize {
        self.counters.workspaces.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        self.fail_spawns
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn behave(&self, spec: &ProcessSpec, stdin: &[u8]) -> Behavior {
        let input = String::from_utf8_lossy(stdin).to_string();
        let mut staged = self.staged.lock().unwrap();

        // Staging step: `sh -c 'cat > /workspace/<file> [&& build]'`
        if spec.argv.first().map(String::as_str) == Some("sh") {
            let script = spec.argv.get(2).cloned().unwrap_or_default();
            staged.insert(spec.workspace.name.clone(), input.clone());
            if script.contains("&&") && input.contains("COMPILE_ERROR") {
                return Behavior::Exit(ProcessExit {
                    stderr: "main.cpp:1:1: error: expected ';' before '}' token".to_string(),
                    exit_code: 1,
                    ..Default::default()
                });
            }
            return Behavior::Exit(ProcessExit::default());
        }

        let Some(program) = staged.get(&spec.workspace.name) else {
            return Behavior::Exit(ProcessExit {
                stderr: "not found".to_string(),
                exit_code: 127,
                ..Default::default()
            });
        };

        if program.contains("# sleep") {
            Behavior::Hang
        } else if program.contains("# crash") {
            Behavior::Exit(ProcessExit {
                stderr: "Traceback (most recent call last)".to_string(),
                exit_code: 1,
                ..Default::default()
            })
        } else if program.contains("# oom") {
            Behavior::Exit(ProcessExit {
                exit_code: 137,
                oom_killed: true,
                ..Default::default()
            })
        } else if program.contains("# double") {
            let n: i64 = input.trim().parse().unwrap_or(0);
            Behavior::Exit(ProcessExit {
                stdout: format!("{}\n", n * 2),
                ..Default::default()
            })
        } else if program.contains("# slow") {
            Behavior::Delayed(
                Duration::from_millis(20),
                ProcessExit {
                    stdout: input,
                    ..Default::default()
                },
            )
        } else {
            Behavior::Exit(ProcessExit {
                stdout: input,
                ..Default::default()
            })
        }
    }
}

enum Behavior {
    Exit(ProcessExit),
    Delayed(Duration, ProcessExit),
    Hang,
}

#[async_trait]
impl Sandbox for FakeSandbox {
    async fn create_workspace(&self, owner: &str) -> Result<Workspace, SandboxError> {
        self.counters.workspaces.fetch_add(1, Ordering::SeqCst);
        Ok(Workspace {
            name: format!("fake-ws-{}-{}", owner, Uuid::new_v4()),
        })
    }

    async fn remove_workspace(&self, workspace: &Workspace) -> Result<(), SandboxError> {
        self.staged.lock().unwrap().remove(&workspace.name);
        self.counters.workspaces.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    async fn spawn(
        &self,
        spec: &ProcessSpec,
        stdin: &[u8],
        _limits: &Limits,
    ) -> Result<Box<dyn SandboxProcess>, SandboxError> {
        if self.take_failure() {
            return Err(SandboxError::backend("create container", "connection reset by peer"));
        }

        let number = self.counters.spawned.fetch_add(1, Ordering::SeqCst);
        let live = self.counters.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_live.fetch_max(live, Ordering::SeqCst);

        Ok(Box::new(FakeProcess {
            id: format!("fake-{}", number),
            behavior: Some(self.behave(spec, stdin)),
            exited: false,
            released: false,
            counters: self.counters.clone(),
        }))
    }
}

struct FakeProcess {
    id: String,
    behavior: Option<Behavior>,
    exited: bool,
    released: bool,
    counters: Arc<Counters>,
}

#[async_trait]
impl SandboxProcess for FakeProcess {
    fn id(&self) -> &str {
        &self.id
    }

    async fn wait(&mut self) -> Result<ProcessExit, SandboxError> {
        match self.behavior.take() {
            Some(Behavior::Exit(exit)) => {
                self.exited = true;
                Ok(exit)
            }
            Some(Behavior::Delayed(delay, exit)) => {
                tokio::time::sleep(delay).await;
                self.exited = true;
                Ok(exit)
            }
            Some(Behavior::Hang) => std::future::pending().await,
            None => Err(SandboxError::backend("wait", "already waited")),
        }
    }

    async fn release(&mut self) -> Result<(), SandboxError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        if !self.exited {
            self.counters.killed.fetch_add(1, Ordering::SeqCst);
        }
        self.counters.live.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

pub const CONFIG: &str = r#"{
    "pool_size": 8,
    "partial_factor": 0.5,
    "system_retries": 2,
    "kill_grace_ms": 500,
    "languages": [
        {
            "name": "python",
            "runner": "python",
            "image": "python:3.12-slim",
            "memory_limit_mb": 128,
            "cpu_limit": 0.5,
            "limits": { "cpu_time_ms": 2000, "wall_clock_ms": 5000 },
            "compile_limits": { "cpu_time_ms": 2000, "wall_clock_ms": 5000 }
        },
        {
            "name": "cpp",
            "runner": "cpp",
            "image": "gcc:13",
            "memory_limit_mb": 256,
            "cpu_limit": 1.0,
            "limits": { "cpu_time_ms": 1000, "wall_clock_ms": 3000 },
            "compile_limits": { "cpu_time_ms": 20000, "wall_clock_ms": 30000 }
        }
    ]
}"#;

pub fn config() -> EngineConfig {
    EngineConfig::from_json(CONFIG).unwrap()
}

pub fn judge(sandbox: Arc<FakeSandbox>) -> Judge {
    init();
    Judge::from_config(&config(), sandbox).unwrap()
}

/// Judge over `CONFIG` with a different pool size and per-submission fan-out.
pub fn parallel_judge(sandbox: Arc<FakeSandbox>, pool_size: usize, parallel_cases: usize) -> Judge {
    init();
    let json = CONFIG.replace(
        "\"pool_size\": 8,",
        &format!(
            "\"pool_size\": {}, \"max_parallel_cases\": {},",
            pool_size, parallel_cases
        ),
    );
    Judge::from_config(&EngineConfig::from_json(&json).unwrap(), sandbox).unwrap()
}

pub fn case(input: &str, expected: &str) -> TestCase {
    TestCase {
        input: input.to_string(),
        expected_output: expected.to_string(),
    }
}

pub fn submission(language: &str, source: &str, cases: Vec<TestCase>, points: u32) -> Submission {
    Submission {
        id: Uuid::new_v4(),
        language_hint: Some(LanguageTag::new(language)),
        source_code: source.to_string(),
        test_cases: cases,
        points_available: points,
    }
}
