use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use tracing::info;

use devarch_core::error::Result;
use devarch_core::runtime::{
    ComposeOptions, ContainerRuntime, ContainerState, ContainerStats, ExecOutput, NetworkInfo,
    RuntimeKind,
};
use devarch_core::types::EffectiveConfig;

use crate::compose_cli::ComposeCli;
use crate::{convert, ops};

/// Engine A: the Docker daemon, over its default socket (or `DOCKER_HOST`).
pub struct DockerEngine {
    docker: Docker,
    compose: ComposeCli,
}

impl DockerEngine {
    pub async fn connect() -> Result<Self> {
        let docker =
            Docker::connect_with_socket_defaults().map_err(convert::map_engine_error)?;
        let version = docker.version().await.map_err(convert::map_engine_error)?;
        info!(
            version = version.version.as_deref().unwrap_or("unknown"),
            "connected to Docker"
        );
        Ok(Self {
            docker,
            compose: ComposeCli::docker(),
        })
    }

    /// Managed containers of one stack (or all stacks), by label.
    pub async fn list_managed(&self, stack: Option<&str>) -> Result<Vec<String>> {
        ops::list_managed_containers(&self.docker, stack).await
    }
}

#[async_trait]
impl ContainerRuntime for DockerEngine {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Docker
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
