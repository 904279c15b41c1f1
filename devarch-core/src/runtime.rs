use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::EffectiveConfig;
use crate::validation;

/// Which concrete engine backs the process. Chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    Docker,
    Podman,
}

impl RuntimeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeKind::Docker => "docker",
            RuntimeKind::Podman => "podman",
        }
    }
}

impl FromStr for RuntimeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "docker" => Ok(RuntimeKind::Docker),
            "podman" => Ok(RuntimeKind::Podman),
            other => Err(Error::validation(format!(
                "unknown runtime '{}', expected docker or podman",
                other
            ))
            .with_field("runtime")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Running,
    Exited,
    Created,
    Paused,
    Restarting,
    Dead,
    Unknown,
}

impl ContainerStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "running" => ContainerStatus::Running,
            "exited" => ContainerStatus::Exited,
            "created" => ContainerStatus::Created,
            "paused" => ContainerStatus::Paused,
            "restarting" => ContainerStatus::Restarting,
            "dead" => ContainerStatus::Dead,
            _ => ContainerStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    None,
    Starting,
    Healthy,
    Unhealthy,
}

/// Observed container state, engine-agnostic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerState {
    pub name: String,
    pub status: ContainerStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub health: HealthStatus,
    pub restart_count: u32,
    pub image_digest: Option<String>,
    pub networks: Vec<String>,
    pub mounts: Vec<String>,
    pub labels: HashMap<String, String>,
    /// Host ports actually bound, sorted.
    pub host_ports: Vec<u16>,
}

impl ContainerState {
    /// Whether this container carries the managed-by identity label.
    pub fn is_managed(&self) -> bool {
        self.labels
            .get(validation::LABEL_MANAGED_BY)
            .map(|v| v == validation::MANAGED_BY_VALUE)
            .unwrap_or(false)
    }

    pub fn stack_label(&self) -> Option<&str> {
        self.labels.get(validation::LABEL_STACK_ID).map(|s| s.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub name: String,
    pub id: String,
    pub driver: String,
    pub managed: bool,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ContainerStats {
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub memory_limit_bytes: u64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// Parameters for a compose invocation. Project name equals the stack name;
/// the engine translates its own flag differences.
#[derive(Debug, Clone)]
pub struct ComposeOptions {
    pub project: String,
    pub file: PathBuf,
    /// Wait for health-gated services up to this budget.
    pub wait_timeout: Option<Duration>,
    pub remove_orphans: bool,
}

/// Capability set both engines satisfy. One concrete type per engine;
/// selection happens once at process start.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    fn kind(&self) -> RuntimeKind;

    /// Cheap liveness probe against the engine socket.
    async fn ping(&self) -> Result<()>;

    /// Returns None when no container of that name exists.
    async fn inspect(&self, name: &str) -> Result<Option<ContainerState>>;

    async fn create(&self, config: &EffectiveConfig, network: &str) -> Result<()>;

    async fn start(&self, name: &str) -> Result<()>;

    async fn stop(&self, name: &str, timeout: Duration) -> Result<()>;

    /// Ignores not-found.
    async fn remove(&self, name: &str, force: bool) -> Result<()>;

    async fn exec(&self, name: &str, cmd: &[String]) -> Result<ExecOutput>;

    /// Last `tail` lines of combined output.
    async fn logs(&self, name: &str, tail: usize) -> Result<String>;

    async fn stats(&self, name: &str) -> Result<ContainerStats>;

    /// Idempotent: succeeds without mutation when a managed bridge of this
    /// name exists; fails with `conflict` when an unmanaged one does.
    async fn network_create(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<()>;

    async fn network_inspect(&self, name: &str) -> Result<Option<NetworkInfo>>;

    /// Managed networks only, regardless of engine.
    async fn network_list(&self) -> Result<Vec<NetworkInfo>>;

    /// Ignores not-found; refuses to remove a non-managed network.
    async fn network_remove(&self, name: &str) -> Result<()>;

    async fn compose_up(&self, opts: &ComposeOptions) -> Result<()>;

    async fn compose_down(&self, opts: &ComposeOptions) -> Result<()>;
}
