//! Docker container plumbing.
//!
//! Thin wrapper over the Docker API for the one long-running sandbox
//! container: image presence and build, orphan discovery by label,
//! container start with bind mounts and published loopback ports, and
//! exec with output caps and a hard deadline.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions, LogOutput,
};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::BuildImageOptions;
use bollard::models::{HostConfig, PortBinding};
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::SandboxError;

/// Label stamped on every sandbox container; orphan cleanup keys on it.
pub const SANDBOX_LABEL: &str = "toolgate.sandbox";

/// Exit code reported for executions killed by their deadline.
pub const TIMEOUT_EXIT_CODE: i64 = 124;

/// The bundled image recipe: a node runtime able to execute the
/// generated TypeScript bindings directly.
pub const SANDBOX_DOCKERFILE: &str = "\
FROM node:20-slim
RUN npm install -g tsx@4
WORKDIR /workspace
CMD [\"sleep\", \"infinity\"]
";

/// Connect to the Docker daemon.
///
/// Tries these locations in order:
/// 1. `DOCKER_HOST` env var (API-client default)
/// 2. `/var/run/docker.sock` (Linux default)
/// 3. `~/.docker/run/docker.sock` (Docker Desktop on macOS)
pub async fn connect_docker() -> Result<Docker, SandboxError> {
    if let Ok(docker) = Docker::connect_with_local_defaults() {
        if docker.ping().await.is_ok() {
            return Ok(docker);
        }
    }

    if let Some(home) = std::env::var_os("HOME") {
        let desktop_sock = std::path::Path::new(&home).join(".docker/run/docker.sock");
        if desktop_sock.exists() {
            let sock_str = desktop_sock.to_string_lossy();
            if let Ok(docker) =
                Docker::connect_with_socket(&sock_str, 120, bollard::API_DEFAULT_VERSION)
            {
                if docker.ping().await.is_ok() {
                    return Ok(docker);
                }
            }
        }
    }

    Err(SandboxError::DockerNotAvailable(
        "socket not found: /var/run/docker.sock".to_string(),
    ))
}

/// Options for starting the long-running sandbox container.
#[derive(Debug, Clone)]
pub struct StartOptions {
    /// Host directory mounted read-write at /workspace
    pub workspace_root: PathBuf,
    /// Host binary mounted read-only, so the in-container proxy can run
    pub binary_path: Option<PathBuf>,
    /// In-container proxy port, published to host loopback
    pub proxy_port: u16,
    /// OAuth redirect port, published to host loopback
    pub redirect_port: u16,
}

/// Outcome of one in-container exec.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub timed_out: bool,
    pub truncated: bool,
}

/// Append `text` to `buf`, capped at `cap` bytes. Returns whether
/// anything was dropped.
fn push_capped(buf: &mut String, text: &str, cap: usize) -> bool {
    if buf.len() >= cap {
        return true;
    }
    let remaining = cap - buf.len();
    if text.len() > remaining {
        let mut cut = remaining;
        while cut > 0 && !text.is_char_boundary(cut) {
            cut -= 1;
        }
        buf.push_str(&text[..cut]);
        true
    } else {
        buf.push_str(text);
        false
    }
}

/// Wrapper owning the Docker handle and the sandbox image name.
#[derive(Clone)]
pub struct ContainerRunner {
    docker: Docker,
    image: String,
}

impl ContainerRunner {
    pub fn new(docker: Docker, image: String) -> Self {
        Self { docker, image }
    }

    pub async fn image_exists(&self) -> bool {
        self.docker.inspect_image(&self.image).await.is_ok()
    }

    /// Build the sandbox image from the bundled recipe.
    pub async fn build_image(&self) -> Result<(), SandboxError> {
        info!("building sandbox image: {}", self.image);

        let context = dockerfile_context(SANDBOX_DOCKERFILE)?;
        let options = BuildImageOptions {
            dockerfile: "Dockerfile".to_string(),
            t: self.image.clone(),
            rm: true,
            ..Default::default()
        };

        let mut stream = self
            .docker
            .build_image(options, None, Some(bytes::Bytes::from(context)));

        while let Some(result) = stream.next().await {
            match result {
                Ok(update) => {
                    if let Some(line) = update.stream {
                        debug!("build: {}", line.trim_end());
                    }
                    if let Some(detail) = update.error {
                        return Err(SandboxError::ImageBuildFailed(detail));
                    }
                }
                Err(e) => return Err(SandboxError::ImageBuildFailed(e.to_string())),
            }
        }

        info!("built sandbox image: {}", self.image);
        Ok(())
    }

    /// Ids of sandbox containers surviving from prior runs.
    pub async fn list_orphans(&self) -> Result<Vec<String>, SandboxError> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![SANDBOX_LABEL.to_string()]);

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(|e| SandboxError::DockerNotAvailable(e.to_string()))?;

        Ok(containers.into_iter().filter_map(|c| c.id).collect())
    }

    /// Stop and remove a container; missing containers are not an error,
    /// which keeps orphan cleanup idempotent.
    pub async fn remove_container(&self, id: &str) -> Result<(), SandboxError> {
        let _ = self
            .docker
            .stop_container(id, Some(StopContainerOptions { t: 5 }))
            .await;

        match self
            .docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(SandboxError::StopFailed(e.to_string())),
        }
    }

    /// Create and start the long-running container. An idle primary
    /// process keeps it alive between script executions.
    pub async fn start_sandbox(&self, options: &StartOptions) -> Result<String, SandboxError> {
        let mut binds = vec![format!(
            "{}:/workspace:rw",
            options.workspace_root.display()
        )];
        if let Some(binary) = &options.binary_path {
            binds.push(format!("{}:/opt/toolgate/toolgate:ro", binary.display()));
        }

        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
        for port in [options.proxy_port, options.redirect_port] {
            let key = format!("{port}/tcp");
            exposed_ports.insert(key.clone(), HashMap::new());
            port_bindings.insert(
                key,
                Some(vec![PortBinding {
                    host_ip: Some("127.0.0.1".to_string()),
                    host_port: Some(port.to_string()),
                }]),
            );
        }

        let host_config = HostConfig {
            binds: Some(binds),
            port_bindings: Some(port_bindings),
            ..Default::default()
        };

        let labels: HashMap<String, String> =
            [(SANDBOX_LABEL.to_string(), "1".to_string())].into();

        let config = Config {
            image: Some(self.image.clone()),
            cmd: Some(vec![
                "sleep".to_string(),
                "infinity".to_string(),
            ]),
            working_dir: Some("/workspace".to_string()),
            labels: Some(labels),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: format!("toolgate-sandbox-{}", uuid::Uuid::new_v4()),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(create_options), config)
            .await
            .map_err(|e| SandboxError::CreateFailed(e.to_string()))?;

        self.docker
            .start_container(&response.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| SandboxError::StartFailed(e.to_string()))?;

        info!(container_id = %response.id, "sandbox container started");
        Ok(response.id)
    }

    /// Launch a background process inside the container (the in-container
    /// proxy) without attaching to it.
    pub async fn spawn_detached(
        &self,
        container_id: &str,
        cmd: Vec<String>,
        env: Vec<String>,
    ) -> Result<(), SandboxError> {
        let exec = self
            .docker
            .create_exec(
                container_id,
                CreateExecOptions {
                    cmd: Some(cmd),
                    env: Some(env),
                    attach_stdout: Some(false),
                    attach_stderr: Some(false),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| SandboxError::ExecutionFailed(format!("exec create failed: {e}")))?;

        self.docker
            .start_exec(
                &exec.id,
                Some(StartExecOptions {
                    detach: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| SandboxError::ExecutionFailed(format!("exec start failed: {e}")))?;

        Ok(())
    }

    /// Run a command inside the container, collecting stdout/stderr up to
    /// `max_output` bytes split across the two streams.
    ///
    /// On deadline expiry the partial output collected so far is returned
    /// with `timed_out` set; the in-container process is killed by the
    /// caller.
    pub async fn exec_collect(
        &self,
        container_id: &str,
        cmd: Vec<String>,
        env: Vec<String>,
        timeout: Duration,
        max_output: usize,
    ) -> Result<ExecOutcome, SandboxError> {
        let start = Instant::now();
        let deadline = start + timeout;

        let exec = self
            .docker
            .create_exec(
                container_id,
                CreateExecOptions {
                    cmd: Some(cmd),
                    env: Some(env),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    working_dir: Some("/workspace".to_string()),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| SandboxError::ExecutionFailed(format!("exec create failed: {e}")))?;

        let started = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| SandboxError::ExecutionFailed(format!("exec start failed: {e}")))?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut truncated = false;
        let mut timed_out = false;
        let half_max = max_output / 2;

        if let StartExecResults::Attached { mut output, .. } = started {
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    timed_out = true;
                    break;
                }

                match tokio::time::timeout(remaining, output.next()).await {
                    Err(_) => {
                        timed_out = true;
                        break;
                    }
                    Ok(None) => break,
                    Ok(Some(Ok(LogOutput::StdOut { message }))) => {
                        let text = String::from_utf8_lossy(&message);
                        truncated |= push_capped(&mut stdout, &text, half_max);
                    }
                    Ok(Some(Ok(LogOutput::StdErr { message }))) => {
                        let text = String::from_utf8_lossy(&message);
                        truncated |= push_capped(&mut stderr, &text, half_max);
                    }
                    Ok(Some(Ok(_))) => {}
                    Ok(Some(Err(e))) => {
                        warn!("error reading exec output: {e}");
                        break;
                    }
                }
            }
        }

        let exit_code = if timed_out {
            TIMEOUT_EXIT_CODE
        } else {
            self.docker
                .inspect_exec(&exec.id)
                .await
                .ok()
                .and_then(|inspect| inspect.exit_code)
                .unwrap_or(-1)
        };

        Ok(ExecOutcome {
            exit_code,
            stdout,
            stderr,
            duration: start.elapsed(),
            timed_out,
            truncated,
        })
    }
}

/// Tar archive holding just the Dockerfile, for use as a build context.
fn dockerfile_context(dockerfile: &str) -> Result<Vec<u8>, SandboxError> {
    let mut builder = tar::Builder::new(Vec::new());
    let bytes = dockerfile.as_bytes();

    let mut header = tar::Header::new_gnu();
    header.set_path("Dockerfile")?;
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();

    builder.append(&header, bytes)?;
    builder
        .into_inner()
        .map_err(|e| SandboxError::ImageBuildFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_capped_under_limit() {
        let mut buf = String::new();
        assert!(!push_capped(&mut buf, "hello", 10));
        assert_eq!(buf, "hello");
    }

    #[test]
    fn test_push_capped_over_limit() {
        let mut buf = String::new();
        assert!(push_capped(&mut buf, "0123456789abc", 10));
        assert_eq!(buf, "0123456789");
        assert!(push_capped(&mut buf, "more", 10));
        assert_eq!(buf.len(), 10);
    }

    #[test]
    fn test_push_capped_respects_char_boundary() {
        let mut buf = String::new();
        push_capped(&mut buf, "aé", 2);
        // 'é' is two bytes; the cut must not split it.
        assert_eq!(buf, "a");
    }

    #[test]
    fn test_dockerfile_context_is_valid_tar() {
        let context = dockerfile_context(SANDBOX_DOCKERFILE).unwrap();
        let mut archive = tar::Archive::new(context.as_slice());
        let entries: Vec<_> = archive.entries().unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_dockerfile_installs_runtime() {
        assert!(SANDBOX_DOCKERFILE.contains("tsx"));
        assert!(SANDBOX_DOCKERFILE.contains("sleep"));
    }
}
