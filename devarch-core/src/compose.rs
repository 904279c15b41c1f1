use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::graph::DependencyGraph;
use crate::types::{
    Diagnostic, DiagnosticKind, EffectiveConfig, Stack, VolumeKind,
};

/// One generated compose document plus everything the planner needs to know
/// about it.
#[derive(Debug, Clone)]
pub struct GeneratedCompose {
    pub yaml: String,
    /// Enabled services in dependency order.
    pub service_order: Vec<String>,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ComposeFile {
    version: String,
    services: BTreeMap<String, ComposeService>,
    networks: BTreeMap<String, ComposeNetwork>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    volumes: BTreeMap<String, ComposeVolume>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ComposeService {
    image: String,
    container_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    restart: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    environment: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    ports: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    volumes: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    depends_on: BTreeMap<String, ComposeDependsOn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    healthcheck: Option<ComposeHealthcheck>,
    networks: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ComposeDependsOn {
    condition: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ComposeHealthcheck {
    test: Vec<String>,
    interval: String,
    timeout: String,
    retries: u32,
    start_period: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ComposeNetwork {
    external: bool,
    name: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ComposeVolume {}

/// Generate the deployable artifact for a stack: one YAML document covering
/// all enabled instances. Byte-identical input yields byte-identical output;
/// services, labels, and named volumes are ordered lexicographically.
///
/// Dependencies on disabled or absent instances are stripped with a warning.
/// Host-port collisions across instances warn too; apply is the gate.
pub fn generate(
    stack: &Stack,
    configs: &[EffectiveConfig],
    host_project_root: Option<&Path>,
) -> Result<GeneratedCompose> {
    let mut diagnostics = Vec::new();

    let enabled: Vec<&EffectiveConfig> = configs.iter().filter(|c| c.enabled).collect();
    for config in configs.iter().filter(|c| !c.enabled) {
        diagnostics.push(
            Diagnostic::new(
                DiagnosticKind::DisabledInstance,
                format!("instance '{}' is disabled and will not run", config.instance_id),
            )
            .for_instance(&config.instance_id),
        );
    }

    let enabled_owned: Vec<EffectiveConfig> = enabled.iter().map(|c| (*c).clone()).collect();
    let (graph, stripped) = DependencyGraph::build(&enabled_owned);
    for strip in &stripped {
        diagnostics.push(
            Diagnostic::new(
                DiagnosticKind::StrippedDependency,
                format!("stripped-dependency: {}->{}", strip.from, strip.to),
            )
            .for_instance(&strip.from),
        );
    }
    let service_order = graph.topo_order()?;

    // Host-port collisions across instances in the same artifact.
    let mut seen_ports: BTreeMap<(u16, &str), &str> = BTreeMap::new();
    for config in &enabled {
        for port in &config.ports {
            if let Some(host) = port.host {
                let key = (host, port.protocol.as_str());
                if let Some(first) = seen_ports.get(&key) {
                    diagnostics.push(
                        Diagnostic::new(
                            DiagnosticKind::PortCollision,
                            format!(
                                "host port {}/{} claimed by both '{}' and '{}'",
                                host,
                                port.protocol.as_str(),
                                first,
                                config.instance_id
                            ),
                        )
                        .for_instance(&config.instance_id),
                    );
                } else {
                    seen_ports.insert(key, &config.instance_id);
                }
            }
        }
    }

    let network = stack.network();
    let healthchecked: BTreeMap<&str, bool> = enabled
        .iter()
        .map(|c| (c.instance_id.as_str(), c.healthcheck.is_some()))
        .collect();

    let mut services = BTreeMap::new();
    let mut named_volumes = BTreeMap::new();
    for config in &enabled {
        let mut depends_on = BTreeMap::new();
        for dep in graph.deps_of(&config.instance_id) {
            let condition = if healthchecked.get(dep).copied().unwrap_or(false) {
                "service_healthy"
            } else {
                "service_started"
            };
            depends_on.insert(
                dep.to_string(),
                ComposeDependsOn {
                    condition: condition.to_string(),
                },
            );
        }

        let mut volume_lines = Vec::with_capacity(config.volumes.len());
        for volume in &config.volumes {
            let source = match volume.kind {
                VolumeKind::Named => {
                    named_volumes.insert(volume.source.clone(), ComposeVolume::default());
                    volume.source.clone()
                }
                VolumeKind::Bind => resolve_bind_source(&volume.source, host_project_root),
            };
            let mut line = format!("{}:{}", source, volume.target);
            if volume.read_only {
                line.push_str(":ro");
            }
            volume_lines.push(line);
        }

        let ports = config
            .ports
            .iter()
            .map(|p| match p.host {
                Some(host) => format!("{}:{}/{}", host, p.container, p.protocol.as_str()),
                None => format!("{}/{}", p.container, p.protocol.as_str()),
            })
            .collect();

        let healthcheck = config.healthcheck.as_ref().map(|hc| ComposeHealthcheck {
            test: hc.test.clone(),
            interval: format!("{}s", hc.interval_secs),
            timeout: format!("{}s", hc.timeout_secs),
            retries: hc.retries,
            start_period: format!("{}s", hc.start_period_secs),
        });

        services.insert(
            config.instance_id.clone(),
            ComposeService {
                image: config.image.clone(),
                container_name: config.container_name.clone(),
                restart: config.restart_policy.clone(),
                command: config.command.clone(),
                user: config.user.clone(),
                environment: config.env.clone(),
                ports,
                volumes: volume_lines,
                labels: config.labels.clone(),
                depends_on,
                healthcheck,
                networks: vec![network.clone()],
            },
        );
    }

    let mut networks = BTreeMap::new();
    networks.insert(
        network.clone(),
        ComposeNetwork {
            external: true,
            name: network.clone(),
        },
    );

    let file = ComposeFile {
        version: "3.8".to_string(),
        services,
        networks,
        volumes: named_volumes,
    };

    Ok(GeneratedCompose {
        yaml: serde_yaml::to_string(&file)?,
        service_order,
        diagnostics,
    })
}

/// Relative bind sources resolve against the host project root when one is
/// configured; the engine otherwise rejects them.
fn resolve_bind_source(source: &str, host_project_root: Option<&Path>) -> String {
    if source.starts_with('/') || source.starts_with('~') {
        return source.to_string();
    }
    match host_project_root {
        Some(root) => root.join(source).to_string_lossy().into_owned(),
        None => source.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HealthcheckSpec, PortSpec, Protocol, VolumeSpec};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn stack() -> Stack {
        let now = Utc::now();
        Stack {
            id: "s1".into(),
            name: "a".into(),
            description: String::new(),
            network_name: None,
            enabled: true,
            last_applied_checksum: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn config(id: &str) -> EffectiveConfig {
        EffectiveConfig {
            stack_name: "a".into(),
            instance_id: id.into(),
            container_name: format!("devarch-a-{}", id),
            template_name: "tpl".into(),
            template_version: 1,
            enabled: true,
            image: "nginx:1.27".into(),
            restart_policy: Some("unless-stopped".into()),
            command: None,
            user: None,
            ports: vec![],
            volumes: vec![],
            env: BTreeMap::new(),
            labels: BTreeMap::new(),
            domains: vec![],
            healthcheck: None,
            config_files: vec![],
            depends_on: vec![],
        }
    }

    #[test]
    fn deterministic_output() {
        let stack = stack();
        let configs = vec![config("web"), config("db")];
        let a = generate(&stack, &configs, None).unwrap();
        let b = generate(&stack, &configs, None).unwrap();
        assert_eq!(a.yaml, b.yaml);

        // Input order must not matter.
        let reversed = vec![config("db"), config("web")];
        let c = generate(&stack, &reversed, None).unwrap();
        assert_eq!(a.yaml, c.yaml);
    }

    #[test]
    fn single_external_network_reference() {
        let stack = stack();
        let out = generate(&stack, &[config("web")], None).unwrap();
        assert!(out.yaml.contains("devarch-a-net"));
        assert!(out.yaml.contains("external: true"));
    }

    #[test]
    fn healthcheck_upgrades_dependency_condition() {
        let stack = stack();
        let mut db = config("db");
        db.healthcheck = Some(HealthcheckSpec {
            test: vec!["CMD".into(), "pg_isready".into()],
            interval_secs: 10,
            timeout_secs: 5,
            retries: 3,
            start_period_secs: 0,
        });
        let mut api = config("api");
        api.depends_on = vec!["db".into()];
        let mut worker = config("worker");
        worker.depends_on = vec!["api".into()];

        let out = generate(&stack, &[db, api, worker], None).unwrap();
        assert!(out.yaml.contains("service_healthy"));
        assert!(out.yaml.contains("service_started"));
        assert_eq!(out.service_order, vec!["db", "api", "worker"]);
    }

    #[test]
    fn stripped_dependency_is_a_warning() {
        let stack = stack();
        let mut api = config("api");
        api.depends_on = vec!["db".into()];
        let mut db = config("db");
        db.enabled = false;

        let out = generate(&stack, &[api, db], None).unwrap();
        let stripped: Vec<_> = out
            .diagnostics
            .iter()
            .filter(|d| d.kind == DiagnosticKind::StrippedDependency)
            .collect();
        assert_eq!(stripped.len(), 1);
        assert!(stripped[0].message.contains("api->db"));
        assert!(!out.yaml.contains("depends_on"));
    }

    #[test]
    fn port_collision_warns_but_generates() {
        let stack = stack();
        let mut one = config("app1");
        one.ports = vec![PortSpec {
            host: Some(8080),
            container: 80,
            protocol: Protocol::Tcp,
        }];
        let mut two = config("app2");
        two.ports = vec![PortSpec {
            host: Some(8080),
            container: 80,
            protocol: Protocol::Tcp,
        }];

        let out = generate(&stack, &[one, two], None).unwrap();
        assert!(out
            .diagnostics
            .iter()
            .any(|d| d.kind == DiagnosticKind::PortCollision));
        assert!(out.yaml.contains("app1"));
        assert!(out.yaml.contains("app2"));
    }

    #[test]
    fn named_volumes_are_collected() {
        let stack = stack();
        let mut db = config("db");
        db.volumes = vec![VolumeSpec {
            source: "pgdata".into(),
            target: "/var/lib/postgresql/data".into(),
            read_only: false,
            kind: VolumeKind::Named,
        }];
        let out = generate(&stack, &[db], None).unwrap();
        assert!(out.yaml.contains("volumes:"));
        assert!(out.yaml.contains("pgdata"));
    }

    #[test]
    fn relative_bind_resolves_against_project_root() {
        let stack = stack();
        let mut web = config("web");
        web.volumes = vec![VolumeSpec {
            source: "src".into(),
            target: "/app".into(),
            read_only: false,
            kind: VolumeKind::Bind,
        }];
        let out = generate(&stack, &[web], Some(Path::new("/home/dev/proj"))).unwrap();
        assert!(out.yaml.contains("/home/dev/proj/src:/app"));
    }
}
