//! Sandbox error types.

use thiserror::Error;

/// Errors that can occur during sandbox operations.
#[derive(Error, Debug)]
pub enum SandboxError {
    /// No Docker-compatible runtime could be reached
    #[error("Docker not available: {0}")]
    DockerNotAvailable(String),

    /// The sandbox image could not be built
    #[error("Image build failed: {0}")]
    ImageBuildFailed(String),

    /// Failed to create the sandbox container
    #[error("Failed to create sandbox: {0}")]
    CreateFailed(String),

    /// Failed to start the sandbox container
    #[error("Failed to start sandbox: {0}")]
    StartFailed(String),

    /// The in-container proxy never became reachable
    #[error("Health check failed: {0}")]
    HealthCheckFailed(String),

    /// Script execution failed at the container boundary
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// Failed to stop the sandbox container
    #[error("Failed to stop sandbox: {0}")]
    StopFailed(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
