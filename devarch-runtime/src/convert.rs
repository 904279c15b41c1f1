use std::collections::HashMap;

use bollard::models::{
    ContainerInspectResponse, HealthConfig, HealthStatusEnum, Network, PortBinding, RestartPolicy,
    RestartPolicyNameEnum,
};
use chrono::{DateTime, Utc};

use devarch_core::error::Error;
use devarch_core::runtime::{ContainerState, ContainerStatus, HealthStatus, NetworkInfo};
use devarch_core::types::{EffectiveConfig, Protocol};
use devarch_core::validation;

/// Translate a bollard error into the engine-agnostic taxonomy. The engine
/// message is preserved as a wrapped cause; callers never pattern-match it.
pub(crate) fn map_engine_error(err: bollard::errors::Error) -> Error {
    match &err {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } => {
            let message = message.clone();
            match *status_code {
                404 => Error::not_found(message).with_cause(err),
                403 => Error::permission_denied(message).with_cause(err),
                409 => Error::conflict(message).with_cause(err),
                400 => Error::new(devarch_core::ErrorKind::Validation, message).with_cause(err),
                _ => Error::internal(message).with_cause(err),
            }
        }
        bollard::errors::Error::IOError { err: io } => match io.kind() {
            std::io::ErrorKind::PermissionDenied => {
                Error::permission_denied("engine socket permission denied").with_cause(err)
            }
            _ => Error::engine_unavailable("engine socket unreachable").with_cause(err),
        },
        // No response from the engine at all: treat as unavailable.
        _ => Error::engine_unavailable(format!("engine request failed: {}", err)).with_cause(err),
    }
}

pub(crate) fn state_from_inspect(
    name: &str,
    response: ContainerInspectResponse,
) -> ContainerState {
    let status = response
        .state
        .as_ref()
        .and_then(|s| s.status.as_ref())
        .map(|s| ContainerStatus::parse(&s.to_string()))
        .unwrap_or(ContainerStatus::Unknown);

    let health = match response
        .state
        .as_ref()
        .and_then(|s| s.health.as_ref())
        .and_then(|h| h.status.as_ref())
    {
        Some(HealthStatusEnum::STARTING) => HealthStatus::Starting,
        Some(HealthStatusEnum::HEALTHY) => HealthStatus::Healthy,
        Some(HealthStatusEnum::UNHEALTHY) => HealthStatus::Unhealthy,
        _ => HealthStatus::None,
    };

    let started_at: Option<DateTime<Utc>> = response
        .state
        .as_ref()
        .and_then(|s| s.started_at.as_deref())
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let labels = response
        .config
        .as_ref()
        .and_then(|c| c.labels.clone())
        .unwrap_or_default();

    let networks: Vec<String> = response
        .network_settings
        .as_ref()
        .and_then(|ns| ns.networks.as_ref())
        .map(|nets| nets.keys().cloned().collect())
        .unwrap_or_default();

    let host_ports = response
        .network_settings
        .as_ref()
        .and_then(|ns| ns.ports.clone())
        .map(host_ports_from_map)
        .unwrap_or_default();

    let mounts = response
        .mounts
        .unwrap_or_default()
        .into_iter()
        .filter_map(|m| m.destination)
        .collect();

    ContainerState {
        name: name.to_string(),
        status,
        started_at,
        health,
        restart_count: response.restart_count.unwrap_or(0).max(0) as u32,
        image_digest: response.image,
        networks,
        mounts,
        labels,
        host_ports,
    }
}

fn host_ports_from_map(ports: HashMap<String, Option<Vec<PortBinding>>>) -> Vec<u16> {
    let mut out: Vec<u16> = ports
        .into_values()
        .flatten()
        .flatten()
        .filter_map(|binding| binding.host_port.and_then(|p| p.parse().ok()))
        .collect();
    out.sort_unstable();
    out.dedup();
    out
}

pub(crate) fn network_info(network: Network) -> NetworkInfo {
    let labels = network.labels.unwrap_or_default();
    let managed = labels
        .get(validation::LABEL_MANAGED_BY)
        .map(|v| v == validation::MANAGED_BY_VALUE)
        .unwrap_or(false);
    NetworkInfo {
        name: network.name.unwrap_or_default(),
        id: network.id.unwrap_or_default(),
        driver: network.driver.unwrap_or_default(),
        managed,
        labels,
    }
}

/// Container config for a direct (non-compose) create.
pub(crate) fn container_config(
    config: &EffectiveConfig,
    network: &str,
) -> bollard::container::Config<String> {
    let env: Vec<String> = config
        .env
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();

    let binds: Vec<String> = config
        .volumes
        .iter()
        .map(|v| {
            if v.read_only {
                format!("{}:{}:ro", v.source, v.target)
            } else {
                format!("{}:{}", v.source, v.target)
            }
        })
        .collect();

    let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
    let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
    for port in &config.ports {
        let proto = match port.protocol {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        };
        let key = format!("{}/{}", port.container, proto);
        exposed_ports.insert(key.clone(), HashMap::new());
        port_bindings.insert(
            key,
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: port.host.map(|p| p.to_string()),
            }]),
        );
    }

    let restart_policy = config.restart_policy.as_deref().map(|policy| RestartPolicy {
        name: Some(match policy {
            "always" => RestartPolicyNameEnum::ALWAYS,
            "unless-stopped" => RestartPolicyNameEnum::UNLESS_STOPPED,
            "on-failure" => RestartPolicyNameEnum::ON_FAILURE,
            _ => RestartPolicyNameEnum::NO,
        }),
        maximum_retry_count: None,
    });

    let healthcheck = config.healthcheck.as_ref().map(|hc| HealthConfig {
        test: Some(hc.test.clone()),
        interval: Some(hc.interval_secs as i64 * 1_000_000_000),
        timeout: Some(hc.timeout_secs as i64 * 1_000_000_000),
        retries: Some(hc.retries as i64),
        start_period: Some(hc.start_period_secs as i64 * 1_000_000_000),
    });

    bollard::container::Config {
        image: Some(config.image.clone()),
        cmd: config.command.clone(),
        user: config.user.clone(),
        env: Some(env),
        labels: Some(config.labels.clone().into_iter().collect()),
        exposed_ports: Some(exposed_ports),
        healthcheck,
        host_config: Some(bollard::models::HostConfig {
            binds: Some(binds),
            port_bindings: Some(port_bindings),
            restart_policy,
            network_mode: Some(network.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}
