//! # toolgate-sandbox
//!
//! The hub's sandboxed-execution subsystem: one long-running container
//! per process, scripts dispatched into it as short-lived processes.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Docker container                         │
//! │                                                              │
//! │  /workspace            ─▶ hub root (rw)                      │
//! │  /opt/toolgate/toolgate ─▶ host binary (ro)                  │
//! │                                                              │
//! │  sleep infinity         (idle primary process)               │
//! │  toolgate proxy-serve   (in-container federation proxy,      │
//! │                          health-probed over loopback HTTP)   │
//! │  tsx job-<id>.ts        (one process per script execution)   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The manager owns the container handle exclusively: orphan cleanup at
//! startup, image build from the bundled recipe, serialized executions
//! with per-script timeouts, and idempotent stop-and-remove on orderly
//! shutdown.

pub mod container;
mod error;
mod manager;
mod workspace;

pub use container::{connect_docker, ContainerRunner, ExecOutcome, StartOptions, SANDBOX_LABEL};
pub use error::SandboxError;
pub use manager::{
    ExecutionState, SandboxConfig, SandboxManager, SandboxState, ScriptExecution,
    DEFAULT_SCRIPT_TIMEOUT_MS,
};
pub use workspace::WorkspacePaths;
