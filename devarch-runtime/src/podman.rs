use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use bollard::{Docker, API_DEFAULT_VERSION};
use tracing::info;

use devarch_core::error::{Error, Result};
use devarch_core::runtime::{
    ComposeOptions, ContainerRuntime, ContainerState, ContainerStats, ExecOutput, NetworkInfo,
    RuntimeKind,
};
use devarch_core::types::EffectiveConfig;

use crate::compose_cli::ComposeCli;
use crate::{convert, ops};

/// Engine B: Podman, through its Docker-compatible API socket.
pub struct PodmanEngine {
    docker: Docker,
    compose: ComposeCli,
}

impl PodmanEngine {
    pub async fn connect() -> Result<Self> {
        let socket = podman_socket_path().ok_or_else(|| {
            Error::engine_unavailable("no podman socket found")
                .with_suggestion("run 'systemctl --user start podman.socket'")
        })?;
        let docker = Docker::connect_with_socket(
            &socket.to_string_lossy(),
            120,
            API_DEFAULT_VERSION,
        )
        .map_err(convert::map_engine_error)?;
        let version = docker.version().await.map_err(convert::map_engine_error)?;
        info!(
            socket = %socket.display(),
            version = version.version.as_deref().unwrap_or("unknown"),
            "connected to Podman"
        );
        Ok(Self {
            docker,
            compose: ComposeCli::podman(),
        })
    }

    pub async fn list_managed(&self, stack: Option<&str>) -> Result<Vec<String>> {
        ops::list_managed_containers(&self.docker, stack).await
    }
}

/// Rootless socket first, system socket second.
fn podman_socket_path() -> Option<PathBuf> {
    if let Ok(explicit) = std::env::var("PODMAN_SOCK") {
        let path = PathBuf::from(explicit);
        if path.exists() {
            return Some(path);
        }
    }
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        let path = PathBuf::from(runtime_dir).join("podman/podman.sock");
        if path.exists() {
            return Some(path);
        }
    }
    let system = PathBuf::from("/run/podman/podman.sock");
    system.exists().then_some(system)
}

#[async_trait]
impl ContainerRuntime for PodmanEngine {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Podman
    }

    async fn ping(&self) -> Result<()> {
        ops::ping(&self.docker).await
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerState>> {
        ops::inspect(&self.docker, name).await
    }

    async fn create(&self, config: &EffectiveConfig, network: &str) -> Result<()> {
        ops::create(&self.docker, config, network).await
    }

    async fn start(&self, name: &str) -> Result<()> {
        ops::start(&self.docker, name).await
    }

    async fn stop(&self, name: &str, timeout: Duration) -> Result<()> {
        ops::stop(&self.docker, name, timeout).await
    }

    async fn remove(&self, name: &str, force: bool) -> Result<()> {
        ops::remove(&self.docker, name, force).await
    }

    async fn exec(&self, name: &str, cmd: &[String]) -> Result<ExecOutput> {
        ops::exec(&self.docker, name, cmd).await
    }

    async fn logs(&self, name: &str, tail: usize) -> Result<String> {
        ops::logs(&self.docker, name, tail).await
    }

    async fn stats(&self, name: &str) -> Result<ContainerStats> {
        ops::stats(&self.docker, name).await
    }

    async fn network_create(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<()> {
        ops::network_create(&self.docker, name, labels).await
    }

    async fn network_inspect(&self, name: &str) -> Result<Option<NetworkInfo>> {
        ops::network_inspect(&self.docker, name).await
    }

    async fn network_list(&self) -> Result<Vec<NetworkInfo>> {
        ops::network_list(&self.docker).await
    }

    async fn network_remove(&self, name: &str) -> Result<()> {
        ops::network_remove(&self.docker, name).await
    }

    async fn compose_up(&self, opts: &ComposeOptions) -> Result<()> {
        self.compose.up(opts).await
    }

    async fn compose_down(&self, opts: &ComposeOptions) -> Result<()> {
        self.compose.down(opts).await
    }
}
