//! Engine operation bodies shared by the Docker and Podman types. Both
//! speak the same HTTP API through bollard; only connection setup and the
//! compose frontend differ between them.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use bollard::Docker;
use bollard::container::{
    CreateContainerOptions, ListContainersOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StatsOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::network::{CreateNetworkOptions, InspectNetworkOptions, ListNetworksOptions};
use futures_util::StreamExt;

use devarch_core::error::{Error, Result};
use devarch_core::runtime::{ContainerState, ContainerStats, ExecOutput, NetworkInfo};
use devarch_core::types::EffectiveConfig;
use devarch_core::validation;

use crate::convert;

/// Upper bound on collected exec/log output.
const OUTPUT_LIMIT_BYTES: usize = 1 << 20;

pub(crate) async fn ping(docker: &Docker) -> Result<()> {
    docker.ping().await.map_err(convert::map_engine_error)?;
    Ok(())
}

pub(crate) async fn inspect(docker: &Docker, name: &str) -> Result<Option<ContainerState>> {
    match docker.inspect_container(name, None).await {
        Ok(response) => Ok(Some(convert::state_from_inspect(name, response))),
        Err(e) => {
            let mapped = convert::map_engine_error(e);
            if mapped.kind == devarch_core::ErrorKind::NotFound {
                Ok(None)
            } else {
                Err(mapped)
            }
        }
    }
}

pub(crate) async fn create(
    docker: &Docker,
    config: &EffectiveConfig,
    network: &str,
) -> Result<()> {
    let options = CreateContainerOptions {
        name: config.container_name.clone(),
        platform: None,
    };
    docker
        .create_container(Some(options), convert::container_config(config, network))
        .await
        .map_err(convert::map_engine_error)?;
    Ok(())
}

pub(crate) async fn start(docker: &Docker, name: &str) -> Result<()> {
    docker
        .start_container(name, None::<StartContainerOptions<String>>)
        .await
        .map_err(convert::map_engine_error)?;
    Ok(())
}

pub(crate) async fn stop(docker: &Docker, name: &str, timeout: Duration) -> Result<()> {
    let options = StopContainerOptions {
        t: timeout.as_secs().min(i64::MAX as u64) as i64,
    };
    docker
        .stop_container(name, Some(options))
        .await
        .map_err(convert::map_engine_error)?;
    Ok(())
}

pub(crate) async fn remove(docker: &Docker, name: &str, force: bool) -> Result<()> {
    let options = RemoveContainerOptions {
        force,
        ..Default::default()
    };
    match docker.remove_container(name, Some(options)).await {
        Ok(()) => Ok(()),
        Err(e) => {
            let mapped = convert::map_engine_error(e);
            if mapped.kind == devarch_core::ErrorKind::NotFound {
                Ok(())
            } else {
                Err(mapped)
            }
        }
    }
}

pub(crate) async fn exec(docker: &Docker, name: &str, cmd: &[String]) -> Result<ExecOutput> {
    let created = docker
        .create_exec(
            name,
            CreateExecOptions {
                cmd: Some(cmd.to_vec()),
                attach_stdout: Some(true),
                attach_stderr: Some(true),
                ..Default::default()
            },
        )
        .await
        .map_err(convert::map_engine_error)?;

    let mut stdout = String::new();
    let mut stderr = String::new();
    match docker
        .start_exec(&created.id, None)
        .await
        .map_err(convert::map_engine_error)?
    {
        StartExecResults::Attached { mut output, .. } => {
            while let Some(chunk) = output.next().await {
                let chunk = chunk.map_err(convert::map_engine_error)?;
                match chunk {
                    bollard::container::LogOutput::StdOut { message } => {
                        if stdout.len() < OUTPUT_LIMIT_BYTES {
                            stdout.push_str(&String::from_utf8_lossy(&message));
                        }
                    }
                    bollard::container::LogOutput::StdErr { message } => {
                        if stderr.len() < OUTPUT_LIMIT_BYTES {
                            stderr.push_str(&String::from_utf8_lossy(&message));
                        }
                    }
                    _ => {}
                }
            }
        }
        StartExecResults::Detached => {}
    }

    let inspected = docker
        .inspect_exec(&created.id)
        .await
        .map_err(convert::map_engine_error)?;

    Ok(ExecOutput {
        exit_code: inspected.exit_code.unwrap_or(-1),
        stdout,
        stderr,
    })
}

pub(crate) async fn logs(docker: &Docker, name: &str, tail: usize) -> Result<String> {
    let options = LogsOptions::<String> {
        stdout: true,
        stderr: true,
        tail: tail.to_string(),
        ..Default::default()
    };
    let mut stream = docker.logs(name, Some(options));
    let mut collected = String::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(convert::map_engine_error)?;
        collected.push_str(&String::from_utf8_lossy(&chunk.into_bytes()));
        if collected.len() >= OUTPUT_LIMIT_BYTES {
            break;
        }
    }
    Ok(collected)
}

pub(crate) async fn stats(docker: &Docker, name: &str) -> Result<ContainerStats> {
    let options = StatsOptions {
        stream: false,
        one_shot: true,
    };
    let mut stream = docker.stats(name, Some(options));
    let sample = stream
        .next()
        .await
        .ok_or_else(|| Error::internal(format!("engine returned no stats for '{}'", name)))?
        .map_err(convert::map_engine_error)?;

    let cpu_delta = sample
        .cpu_stats
        .cpu_usage
        .total_usage
        .saturating_sub(sample.precpu_stats.cpu_usage.total_usage);
    let system_delta = sample
        .cpu_stats
        .system_cpu_usage
        .unwrap_or(0)
        .saturating_sub(sample.precpu_stats.system_cpu_usage.unwrap_or(0));
    let online_cpus = sample.cpu_stats.online_cpus.unwrap_or(1).max(1);
    let cpu_percent = if system_delta > 0 {
        (cpu_delta as f64 / system_delta as f64) * online_cpus as f64 * 100.0
    } else {
        0.0
    };

    let (rx_bytes, tx_bytes) = sample
        .networks
        .as_ref()
        .map(|nets| {
            nets.values()
                .fold((0u64, 0u64), |(rx, tx), n| (rx + n.rx_bytes, tx + n.tx_bytes))
        })
        .unwrap_or((0, 0));

    Ok(ContainerStats {
        cpu_percent,
        memory_bytes: sample.memory_stats.usage.unwrap_or(0),
        memory_limit_bytes: sample.memory_stats.limit.unwrap_or(0),
        rx_bytes,
        tx_bytes,
    })
}

pub(crate) async fn network_create(
    docker: &Docker,
    name: &str,
    labels: &BTreeMap<String, String>,
) -> Result<()> {
    if let Some(existing) = network_inspect(docker, name).await? {
        if existing.managed {
            return Ok(());
        }
        return Err(Error::conflict(format!(
            "a network named '{}' exists but is not managed by devarch",
            name
        ))
        .with_suggestion("remove the conflicting network or set an explicit network override"));
    }

    let mut create_labels: HashMap<String, String> =
        labels.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    create_labels.insert(
        validation::LABEL_MANAGED_BY.to_string(),
        validation::MANAGED_BY_VALUE.to_string(),
    );

    docker
        .create_network(CreateNetworkOptions {
            name: name.to_string(),
            driver: "bridge".to_string(),
            labels: create_labels,
            ..Default::default()
        })
        .await
        .map_err(convert::map_engine_error)?;
    Ok(())
}

pub(crate) async fn network_inspect(docker: &Docker, name: &str) -> Result<Option<NetworkInfo>> {
    match docker
        .inspect_network(name, None::<InspectNetworkOptions<String>>)
        .await
    {
        Ok(network) => Ok(Some(convert::network_info(network))),
        Err(e) => {
            let mapped = convert::map_engine_error(e);
            if mapped.kind == devarch_core::ErrorKind::NotFound {
                Ok(None)
            } else {
                Err(mapped)
            }
        }
    }
}

pub(crate) async fn network_list(docker: &Docker) -> Result<Vec<NetworkInfo>> {
    let label_filter = format!(
        "{}={}",
        validation::LABEL_MANAGED_BY,
        validation::MANAGED_BY_VALUE
    );
    let mut filters = HashMap::new();
    filters.insert("label".to_string(), vec![label_filter]);

    let networks = docker
        .list_networks(Some(ListNetworksOptions { filters }))
        .await
        .map_err(convert::map_engine_error)?;
    Ok(networks.into_iter().map(convert::network_info).collect())
}

pub(crate) async fn network_remove(docker: &Docker, name: &str) -> Result<()> {
    match network_inspect(docker, name).await? {
        None => Ok(()),
        Some(info) if !info.managed => Err(Error::conflict(format!(
            "refusing to remove network '{}': not managed by devarch",
            name
        ))),
        Some(_) => {
            docker
                .remove_network(name)
                .await
                .map_err(convert::map_engine_error)?;
            Ok(())
        }
    }
}

/// Containers carrying the devarch managed label, optionally restricted to
/// one stack.
pub(crate) async fn list_managed_containers(
    docker: &Docker,
    stack: Option<&str>,
) -> Result<Vec<String>> {
    let mut label_filters = vec![format!(
        "{}={}",
        validation::LABEL_MANAGED_BY,
        validation::MANAGED_BY_VALUE
    )];
    if let Some(stack) = stack {
        label_filters.push(format!("{}={}", validation::LABEL_STACK_ID, stack));
    }
    let mut filters = HashMap::new();
    filters.insert("label".to_string(), label_filters);

    let containers = docker
        .list_containers(Some(ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        }))
        .await
        .map_err(convert::map_engine_error)?;

    Ok(containers
        .into_iter()
        .filter_map(|c| c.names)
        .filter_map(|names| names.first().cloned())
        .map(|name| name.trim_start_matches('/').to_string())
        .collect())
}
