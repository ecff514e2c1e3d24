//! One-shot startup wiring.
//!
//! `run` is the hub proper: discovery, binding generation, sandbox,
//! façade, then serving the four meta-operations to the chat loop.
//! `run_proxy` is the in-container instance: the full namespaced
//! catalog over HTTP, with its own backend sessions. The two instances
//! never communicate directly.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use toolgate_bindings::BindingGenerator;
use toolgate_facade::{KeepAllSelector, LlmSelector, MetaTools, Selector};
use toolgate_mcp::{serve_http, serve_stdio, CredentialProvider, ToolProxy, ToolService};
use toolgate_oauth::OAuthBroker;
use toolgate_sandbox::{SandboxConfig, SandboxManager, WorkspacePaths};

use crate::config::HubConfig;

/// Container path of the workspace root bind mount.
const CONTAINER_WORKSPACE: &str = "/workspace";

/// Container path of the read-only host binary mount.
const CONTAINER_BINARY: &str = "/opt/toolgate/toolgate";

/// In-container config file name, staged under the workspace root.
const CONTAINER_CONFIG: &str = ".toolgate-container.json";

fn build_selector() -> Box<dyn Selector> {
    match LlmSelector::from_env() {
        Some(selector) => Box::new(selector),
        None => {
            info!("no selector API key configured; search_tools returns all candidates");
            Box::new(KeepAllSelector)
        }
    }
}

/// Env override for the HTTP interface port.
fn http_port_override() -> Option<u16> {
    std::env::var("TOOLGATE_HTTP_PORT")
        .ok()
        .and_then(|raw| raw.parse().ok())
}

/// Host-side hub: the entry point the chat loop talks to.
pub async fn run(config: HubConfig) -> anyhow::Result<()> {
    let paths = WorkspacePaths::new(&config.paths.workspace);
    paths.ensure().context("preparing workspace directories")?;

    let broker: Arc<OAuthBroker> =
        Arc::new(OAuthBroker::new(paths.oauth(), config.ports.redirect));
    let credentials: Arc<dyn CredentialProvider> = broker;

    let proxy = Arc::new(ToolProxy::new());
    proxy
        .connect_all(&config.mcp_config(), Some(credentials))
        .await;
    info!(tools = proxy.catalog().len().await, "discovery complete");

    // Bindings regenerate on every startup so the stubs always mirror
    // the live catalog.
    let entries = proxy.catalog_entries().await;
    BindingGenerator::new(paths.generated())
        .generate(&entries)
        .context("generating tool bindings")?;

    // Stage the in-container proxy's config inside the mount.
    let container_config = config.for_container(CONTAINER_WORKSPACE);
    let container_config_path = paths.root().join(CONTAINER_CONFIG);
    std::fs::write(
        &container_config_path,
        serde_json::to_vec_pretty(&container_config)?,
    )
    .context("staging in-container config")?;

    let sandbox = Arc::new(SandboxManager::new(SandboxConfig {
        image: config.sandbox_image.clone(),
        workspace_root: config.paths.workspace.clone(),
        binary_path: std::env::current_exe().ok(),
        proxy_command: vec![
            CONTAINER_BINARY.to_string(),
            "proxy-serve".to_string(),
            "--config".to_string(),
            format!("{CONTAINER_WORKSPACE}/{CONTAINER_CONFIG}"),
        ],
        proxy_port: config.ports.proxy,
        redirect_port: config.ports.redirect,
        ..Default::default()
    }));

    // Warm start; a failure here is recoverable, the first
    // execute_script retries with a fresh sandbox.
    if let Err(e) = sandbox.ensure_started().await {
        warn!(error = %e, "sandbox not available yet, will retry on first execution");
    }

    spawn_cleanup_handler(sandbox.clone());

    let facade: Arc<dyn ToolService> = Arc::new(MetaTools::new(
        proxy.clone(),
        sandbox.clone(),
        build_selector(),
    ));

    if let Some(port) = http_port_override().or(config.ports.http) {
        let http_facade = facade.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_http(http_facade, port).await {
                warn!(error = %e, "HTTP interface stopped");
            }
        });
    }

    // The chat loop drives us over stdio until EOF.
    let outcome = serve_stdio(facade).await;

    sandbox.shutdown().await;
    proxy.close_all().await;
    outcome.context("stdio service")
}

/// In-container federation proxy: exposes the full namespaced catalog
/// over HTTP to scripts on container loopback.
pub async fn run_proxy(config: HubConfig) -> anyhow::Result<()> {
    let paths = WorkspacePaths::new(&config.paths.workspace);
    paths.ensure().context("preparing workspace directories")?;

    let broker: Arc<OAuthBroker> =
        Arc::new(OAuthBroker::new(paths.oauth(), config.ports.redirect));
    let credentials: Arc<dyn CredentialProvider> = broker;

    let proxy = Arc::new(ToolProxy::new());
    proxy
        .connect_all(&config.mcp_config(), Some(credentials))
        .await;
    info!(
        tools = proxy.catalog().len().await,
        "in-container proxy ready"
    );

    let port = http_port_override()
        .or(config.ports.http)
        .unwrap_or(config.ports.proxy);

    serve_http(proxy, port).await.context("http service")
}

/// Wire the cleanup obligation to termination signals. Shutdown is
/// idempotent, so racing the normal exit path is harmless.
fn spawn_cleanup_handler(sandbox: Arc<SandboxManager>) {
    tokio::spawn(async move {
        wait_for_termination().await;
        warn!("termination signal received, cleaning up sandbox");
        sandbox.shutdown().await;
        std::process::exit(130);
    });
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            warn!(error = %e, "cannot install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}
