//! Sandbox lifecycle and script dispatch.
//!
//! One manager per process, one container per manager:
//!
//! ```text
//!                    absent
//!                      │ ensure_started
//!                      ▼
//!    orphan cleanup ─▶ starting ──▶ healthy ◀─────────┐
//!    image build        │             │               │
//!                       │ probe fail  │ probe/exec    │ next execute
//!                       ▼             ▼ fault         │ starts fresh
//!                    absent        unhealthy ─────────┘
//! ```
//!
//! Executions are serialized by a mutex; the container is stopped and
//! removed exactly once on orderly shutdown.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::container::{connect_docker, ContainerRunner, StartOptions};
use crate::workspace::WorkspacePaths;
use crate::SandboxError;

/// Default wall-clock budget for one script.
pub const DEFAULT_SCRIPT_TIMEOUT_MS: u64 = 30_000;

/// Implicit import prepended to every script so the generated bindings
/// are in scope.
const SCRIPT_PRELUDE: &str =
    "import * as servers from \"/workspace/generated/servers/index.ts\";\n";

/// Sandbox lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    Absent,
    Starting,
    Healthy,
    Unhealthy,
}

/// Terminal state of one script execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Pending,
    Running,
    Completed,
    TimedOut,
    Failed,
}

/// Record of one script execution.
#[derive(Debug, Clone, Serialize)]
pub struct ScriptExecution {
    pub id: String,
    pub state: ExecutionState,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    pub duration_ms: u64,
    pub truncated: bool,
}

/// Sandbox configuration.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Tag of the sandbox image; built from the bundled recipe if absent
    pub image: String,
    /// Hub root, mounted read-write at /workspace
    pub workspace_root: PathBuf,
    /// Host binary to mount read-only for the in-container proxy;
    /// `None` disables the proxy spawn (tests)
    pub binary_path: Option<PathBuf>,
    /// Argv of the in-container proxy process
    pub proxy_command: Vec<String>,
    /// In-container proxy port, published on host loopback
    pub proxy_port: u16,
    /// OAuth redirect port, published on host loopback
    pub redirect_port: u16,
    /// Health probe interval
    pub probe_interval: Duration,
    /// Total health probe budget
    pub probe_budget: Duration,
    /// Cap on collected stdout+stderr per execution
    pub max_output_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: "toolgate-sandbox:latest".to_string(),
            workspace_root: PathBuf::from("."),
            binary_path: None,
            proxy_command: vec![
                "/opt/toolgate/toolgate".to_string(),
                "proxy-serve".to_string(),
            ],
            proxy_port: 8700,
            redirect_port: 3000,
            probe_interval: Duration::from_millis(200),
            probe_budget: Duration::from_secs(30),
            max_output_bytes: 64 * 1024,
        }
    }
}

struct Inner {
    state: SandboxState,
    container_id: Option<String>,
    runner: Option<ContainerRunner>,
}

/// The singleton sandbox manager.
pub struct SandboxManager {
    config: SandboxConfig,
    paths: WorkspacePaths,
    inner: Mutex<Inner>,
    /// Serializes executions; concurrent submissions queue here.
    exec_lock: Mutex<()>,
    http: reqwest::Client,
    shut_down: AtomicBool,
}

impl SandboxManager {
    pub fn new(config: SandboxConfig) -> Self {
        let paths = WorkspacePaths::new(&config.workspace_root);
        Self {
            config,
            paths,
            inner: Mutex::new(Inner {
                state: SandboxState::Absent,
                container_id: None,
                runner: None,
            }),
            exec_lock: Mutex::new(()),
            http: reqwest::Client::new(),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn paths(&self) -> &WorkspacePaths {
        &self.paths
    }

    pub async fn state(&self) -> SandboxState {
        self.inner.lock().await.state
    }

    /// Ensure the container is up and the in-container proxy answers its
    /// health probe. A no-op when already healthy; anything else tears
    /// down leftovers and starts fresh.
    #[instrument(skip(self))]
    pub async fn ensure_started(&self) -> Result<(), SandboxError> {
        let mut inner = self.inner.lock().await;
        if inner.state == SandboxState::Healthy {
            return Ok(());
        }

        self.paths.ensure()?;

        let docker = connect_docker().await?;
        let runner = ContainerRunner::new(docker, self.config.image.clone());

        // A previous container in this process, or orphans from prior
        // runs, are stopped and removed before starting over.
        if let Some(previous) = inner.container_id.take() {
            let _ = runner.remove_container(&previous).await;
        }
        for orphan in runner.list_orphans().await? {
            info!(container_id = %orphan, "removing orphaned sandbox container");
            runner.remove_container(&orphan).await?;
        }

        if !runner.image_exists().await {
            runner.build_image().await?;
        }

        inner.state = SandboxState::Starting;

        let container_id = runner
            .start_sandbox(&StartOptions {
                workspace_root: self.config.workspace_root.clone(),
                binary_path: self.config.binary_path.clone(),
                proxy_port: self.config.proxy_port,
                redirect_port: self.config.redirect_port,
            })
            .await?;

        if !self.config.proxy_command.is_empty() && self.config.binary_path.is_some() {
            runner
                .spawn_detached(
                    &container_id,
                    self.config.proxy_command.clone(),
                    vec![format!("TOOLGATE_HTTP_PORT={}", self.config.proxy_port)],
                )
                .await?;
        }

        match self.probe_health().await {
            Ok(()) => {
                inner.state = SandboxState::Healthy;
                inner.container_id = Some(container_id);
                inner.runner = Some(runner);
                info!("sandbox healthy");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "sandbox failed its health probe");
                let _ = runner.remove_container(&container_id).await;
                inner.state = SandboxState::Absent;
                Err(e)
            }
        }
    }

    /// Poll the in-container proxy over loopback HTTP until it answers
    /// or the budget runs out.
    async fn probe_health(&self) -> Result<(), SandboxError> {
        let url = format!("http://127.0.0.1:{}/health", self.config.proxy_port);
        let deadline = std::time::Instant::now() + self.config.probe_budget;

        loop {
            match self.http.get(&url).send().await {
                Ok(response) if response.status().is_success() => return Ok(()),
                _ => {}
            }
            if std::time::Instant::now() >= deadline {
                return Err(SandboxError::HealthCheckFailed(format!(
                    "no answer from {url} within {:?}",
                    self.config.probe_budget
                )));
            }
            tokio::time::sleep(self.config.probe_interval).await;
        }
    }

    /// Execute a script inside the sandbox.
    ///
    /// Serialized: a second submission queues until the first completes.
    /// On deadline expiry the in-container process is killed, partial
    /// output is returned and the state is `TimedOut`.
    #[instrument(skip(self, code))]
    pub async fn execute_script(
        &self,
        code: &str,
        timeout_ms: u64,
    ) -> Result<ScriptExecution, SandboxError> {
        let _serialized = self.exec_lock.lock().await;

        // Recovery path: an unhealthy or absent sandbox is rebuilt on
        // the next execute.
        self.ensure_started().await?;

        let id = uuid::Uuid::new_v4().to_string();
        let file_name = format!("job-{id}.ts");
        let host_path = self.paths.root().join(&file_name);
        let container_path = format!("/workspace/{file_name}");

        let mut script = String::with_capacity(SCRIPT_PRELUDE.len() + code.len());
        script.push_str(SCRIPT_PRELUDE);
        script.push_str(code);
        std::fs::write(&host_path, &script)?;

        // Clone the handle out so the state lock is not held for the
        // whole execution; shutdown stays responsive.
        let (runner, container_id) = {
            let inner = self.inner.lock().await;
            let runner = inner
                .runner
                .clone()
                .ok_or_else(|| SandboxError::ExecutionFailed("sandbox not running".to_string()))?;
            let container_id = inner
                .container_id
                .clone()
                .ok_or_else(|| SandboxError::ExecutionFailed("sandbox not running".to_string()))?;
            (runner, container_id)
        };

        let outcome = runner
            .exec_collect(
                &container_id,
                vec!["tsx".to_string(), container_path.clone()],
                vec![format!(
                    "TOOLGATE_PROXY_ENDPOINT=http://127.0.0.1:{}/mcp",
                    self.config.proxy_port
                )],
                Duration::from_millis(timeout_ms),
                self.config.max_output_bytes,
            )
            .await;

        if matches!(&outcome, Ok(o) if o.timed_out) {
            // Kill whatever the deadline left behind.
            let _ = runner
                .spawn_detached(
                    &container_id,
                    vec!["pkill".to_string(), "-f".to_string(), file_name.clone()],
                    vec![],
                )
                .await;
        }

        let _ = std::fs::remove_file(&host_path);

        match outcome {
            Ok(outcome) => {
                let state = if outcome.timed_out {
                    ExecutionState::TimedOut
                } else if outcome.exit_code == 0 {
                    ExecutionState::Completed
                } else {
                    ExecutionState::Failed
                };

                Ok(ScriptExecution {
                    id,
                    state,
                    stdout: outcome.stdout,
                    stderr: outcome.stderr,
                    exit_code: outcome.exit_code,
                    duration_ms: outcome.duration.as_millis() as u64,
                    truncated: outcome.truncated,
                })
            }
            Err(e) => {
                // The container boundary itself faulted; demote so the
                // next execute starts a fresh sandbox.
                self.inner.lock().await.state = SandboxState::Unhealthy;
                Err(e)
            }
        }
    }

    /// Stop and remove the container. Idempotent: safe to call from both
    /// the signal handler and the normal exit path.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut inner = self.inner.lock().await;
        let container_id = inner.container_id.take();
        if let (Some(runner), Some(container_id)) = (inner.runner.as_ref(), container_id) {
            match runner.remove_container(&container_id).await {
                Ok(()) => info!(container_id = %container_id, "sandbox container removed"),
                Err(e) => warn!(error = %e, "failed to remove sandbox container"),
            }
        }
        inner.state = SandboxState::Absent;
        inner.runner = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::TIMEOUT_EXIT_CODE;

    #[test]
    fn test_default_config() {
        let config = SandboxConfig::default();
        assert_eq!(config.proxy_port, 8700);
        assert_eq!(config.redirect_port, 3000);
        assert_eq!(config.probe_interval, Duration::from_millis(200));
        assert_eq!(config.probe_budget, Duration::from_secs(30));
    }

    #[test]
    fn test_execution_state_wire_names() {
        assert_eq!(
            serde_json::to_value(ExecutionState::TimedOut).unwrap(),
            "timed_out"
        );
        assert_eq!(
            serde_json::to_value(ExecutionState::Completed).unwrap(),
            "completed"
        );
    }

    #[test]
    fn test_timeout_exit_code_is_non_negative() {
        assert!(TIMEOUT_EXIT_CODE >= 0);
    }

    #[test]
    fn test_script_prelude_imports_bindings() {
        assert!(SCRIPT_PRELUDE.contains("/workspace/generated/servers/index.ts"));
    }

    #[tokio::test]
    async fn test_manager_starts_absent() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SandboxManager::new(SandboxConfig {
            workspace_root: dir.path().to_path_buf(),
            ..Default::default()
        });
        assert_eq!(manager.state().await, SandboxState::Absent);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_without_container() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SandboxManager::new(SandboxConfig {
            workspace_root: dir.path().to_path_buf(),
            ..Default::default()
        });
        manager.shutdown().await;
        manager.shutdown().await;
        assert_eq!(manager.state().await, SandboxState::Absent);
    }
}
