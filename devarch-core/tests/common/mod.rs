use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use devarch_core::config::Settings;
use devarch_core::error::{Error, ErrorKind, Result};
use devarch_core::runtime::{
    ComposeOptions, ContainerRuntime, ContainerState, ContainerStats, ContainerStatus,
    ExecOutput, HealthStatus, NetworkInfo, RuntimeKind,
};
use devarch_core::store::{Store, TemplateSpec};
use devarch_core::types::{EffectiveConfig, EnvVar, PortSpec, Protocol};

/// In-memory engine standing in for Docker/Podman. `compose_up` parses the
/// generated YAML and fabricates running containers from it.
#[derive(Default)]
pub struct MockRuntime {
    pub containers: Mutex<HashMap<String, ContainerState>>,
    pub networks: Mutex<HashMap<String, NetworkInfo>>,
    pub compose_failure: Mutex<Option<ErrorKind>>,
    pub ping_fails: AtomicBool,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_compose(&self, kind: ErrorKind) {
        *self.compose_failure.lock().unwrap() = Some(kind);
    }

    /// Plant a container that devarch does not manage.
    pub fn plant_unmanaged(&self, name: &str) {
        let state = ContainerState {
            name: name.to_string(),
            status: ContainerStatus::Running,
            started_at: Some(Utc::now()),
            health: HealthStatus::None,
            restart_count: 0,
            image_digest: Some("sha256:foreign".to_string()),
            networks: vec![],
            mounts: vec![],
            labels: HashMap::new(),
            host_ports: vec![],
        };
        self.containers.lock().unwrap().insert(name.to_string(), state);
    }

    pub fn container_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.containers.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn network_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.networks.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Docker
    }

    async fn ping(&self) -> Result<()> {
        if self.ping_fails.load(Ordering::SeqCst) {
            return Err(Error::engine_unavailable("mock engine down"));
        }
        Ok(())
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerState>> {
        Ok(self.containers.lock().unwrap().get(name).cloned())
    }

    async fn create(&self, config: &EffectiveConfig, network: &str) -> Result<()> {
        let state = ContainerState {
            name: config.container_name.clone(),
            status: ContainerStatus::Created,
            started_at: None,
            health: HealthStatus::None,
            restart_count: 0,
            image_digest: Some(format!("sha256:mock-{}", config.image)),
            networks: vec![network.to_string()],
            mounts: vec![],
            labels: config.labels.clone().into_iter().collect(),
            host_ports: config.ports.iter().filter_map(|p| p.host).collect(),
        };
        self.containers
            .lock()
            .unwrap()
            .insert(config.container_name.clone(), state);
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<()> {
        match self.containers.lock().unwrap().get_mut(name) {
            Some(state) => {
                state.status = ContainerStatus::Running;
                state.started_at = Some(Utc::now());
                Ok(())
            }
            None => Err(Error::not_found(format!("no container '{}'", name))),
        }
    }

    async fn stop(&self, name: &str, _timeout: Duration) -> Result<()> {
        if let Some(state) = self.containers.lock().unwrap().get_mut(name) {
            state.status = ContainerStatus::Exited;
        }
        Ok(())
    }

    async fn remove(&self, name: &str, _force: bool) -> Result<()> {
        self.containers.lock().unwrap().remove(name);
        Ok(())
    }

    async fn exec(&self, name: &str, cmd: &[String]) -> Result<ExecOutput> {
        if !self.containers.lock().unwrap().contains_key(name) {
            return Err(Error::not_found(format!("no container '{}'", name)));
        }
        Ok(ExecOutput {
            exit_code: 0,
            stdout: format!("ran: {}", cmd.join(" ")),
            stderr: String::new(),
        })
    }

    async fn logs(&self, name: &str, _tail: usize) -> Result<String> {
        Ok(format!("logs for {}", name))
    }

    async fn stats(&self, _name: &str) -> Result<ContainerStats> {
        Ok(ContainerStats {
            cpu_percent: 1.0,
            memory_bytes: 1024,
            memory_limit_bytes: 4096,
            rx_bytes: 0,
            tx_bytes: 0,
        })
    }

    async fn network_create(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<()> {
        let mut networks = self.networks.lock().unwrap();
        if let Some(existing) = networks.get(name) {
            if existing.managed {
                return Ok(());
            }
            return Err(Error::conflict(format!("network '{}' not managed", name)));
        }
        let mut labels: HashMap<String, String> = labels.clone().into_iter().collect();
        labels.insert("devarch.managed_by".to_string(), "devarch".to_string());
        networks.insert(
            name.to_string(),
            NetworkInfo {
                name: name.to_string(),
                id: format!("net-{}", name),
                driver: "bridge".to_string(),
                managed: true,
                labels,
            },
        );
        Ok(())
    }

    async fn network_inspect(&self, name: &str) -> Result<Option<NetworkInfo>> {
        Ok(self.networks.lock().unwrap().get(name).cloned())
    }

    async fn network_list(&self) -> Result<Vec<NetworkInfo>> {
        Ok(self
            .networks
            .lock()
            .unwrap()
            .values()
            .filter(|n| n.managed)
            .cloned()
            .collect())
    }

    async fn network_remove(&self, name: &str) -> Result<()> {
        let mut networks = self.networks.lock().unwrap();
        match networks.get(name) {
            None => Ok(()),
            Some(info) if !info.managed => {
                Err(Error::conflict(format!("network '{}' not managed", name)))
            }
            Some(_) => {
                networks.remove(name);
                Ok(())
            }
        }
    }

    async fn compose_up(&self, opts: &ComposeOptions) -> Result<()> {
        // Let concurrent applies overlap so lock contention is observable.
        tokio::time::sleep(Duration::from_millis(50)).await;

        if let Some(kind) = self.compose_failure.lock().unwrap().take() {
            return Err(Error::new(kind, "mock compose failure"));
        }

        let yaml = std::fs::read_to_string(&opts.file)
            .map_err(|e| Error::internal(format!("mock cannot read compose file: {}", e)))?;
        let doc: serde_yaml::Value = serde_yaml::from_str(&yaml)
            .map_err(|e| Error::internal(format!("mock cannot parse compose file: {}", e)))?;

        let services = doc
            .get("services")
            .and_then(|s| s.as_mapping())
            .cloned()
            .unwrap_or_default();
        let mut containers = self.containers.lock().unwrap();
        for (_, service) in services {
            let name = service
                .get("container_name")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let image = service
                .get("image")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let labels: HashMap<String, String> = service
                .get("labels")
                .and_then(|v| v.as_mapping())
                .map(|m| {
                    m.iter()
                        .filter_map(|(k, v)| {
                            Some((k.as_str()?.to_string(), v.as_str()?.to_string()))
                        })
                        .collect()
                })
                .unwrap_or_default();
            let host_ports: Vec<u16> = service
                .get("ports")
                .and_then(|v| v.as_sequence())
                .map(|seq| {
                    seq.iter()
                        .filter_map(|p| p.as_str())
                        .filter_map(|p| p.split(':').next())
                        .filter_map(|p| p.parse().ok())
                        .collect()
                })
                .unwrap_or_default();

            containers.insert(
                name.clone(),
                ContainerState {
                    name,
                    status: ContainerStatus::Running,
                    started_at: Some(Utc::now()),
                    health: HealthStatus::None,
                    restart_count: 0,
                    image_digest: Some(format!("sha256:mock-{}", image)),
                    networks: vec![opts.project.clone()],
                    mounts: vec![],
                    labels,
                    host_ports,
                },
            );
        }
        Ok(())
    }

    async fn compose_down(&self, opts: &ComposeOptions) -> Result<()> {
        let prefix = format!("devarch-{}-", opts.project);
        self.containers
            .lock()
            .unwrap()
            .retain(|name, _| !name.starts_with(&prefix));
        Ok(())
    }
}

/// Settings pointed at temp directories.
pub fn test_settings(dir: &std::path::Path) -> Settings {
    let mut settings = Settings::default();
    settings.compose_root = dir.join("compose").to_string_lossy().into_owned();
    settings.database_path = dir.join("devarch.db").to_string_lossy().into_owned();
    settings.lock_ttl_secs = 60;
    settings.engine_timeout_secs = 5;
    settings.apply_timeout_secs = 30;
    settings
}

pub async fn open_store(settings: &Settings) -> Store {
    Store::new(&settings.database_path).await.unwrap()
}

/// A small PHP-ish template with one port and one env var.
pub fn php_template() -> TemplateSpec {
    TemplateSpec {
        image: "php:8.3-fpm".to_string(),
        restart_policy: Some("unless-stopped".to_string()),
        ports: vec![PortSpec {
            host: Some(9000),
            container: 9000,
            protocol: Protocol::Tcp,
        }],
        env: vec![EnvVar {
            key: "APP_ENV".to_string(),
            value: "local".to_string(),
            secret: false,
        }],
        ..Default::default()
    }
}

pub fn postgres_template() -> TemplateSpec {
    TemplateSpec {
        image: "postgres:16".to_string(),
        restart_policy: Some("unless-stopped".to_string()),
        env: vec![EnvVar {
            key: "POSTGRES_DB".to_string(),
            value: "app".to_string(),
            secret: false,
        }],
        ..Default::default()
    }
}
