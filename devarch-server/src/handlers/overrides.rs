use std::collections::BTreeMap;

use warp::http::StatusCode;
use warp::{Rejection, Reply};

use devarch_core::error::Error;
use devarch_core::types::{
    ConfigFileSpec, DomainSpec, EnvVar, HealthcheckSpec, PortSpec, ScalarOverrides, VolumeSpec,
};
use devarch_core::validation;

use crate::reject::reject;
use crate::state::AppState;

fn parse_body<T: serde::de::DeserializeOwned>(set: &str, body: serde_json::Value) -> Result<T, Rejection> {
    serde_json::from_value(body).map_err(|e| {
        reject(
            Error::validation(format!("body does not match the '{}' override shape: {}", set, e))
                .with_field(set),
        )
    })
}

/// PUT `/stacks/{stack}/instances/{instance}/{set}` — full replacement of
/// one override set.
pub async fn put(
    stack: String,
    instance_id: String,
    set: String,
    body: serde_json::Value,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    let instance = state
        .store
        .require_instance(&stack, &instance_id)
        .await
        .map_err(reject)?;
    let pk = instance.id.as_str();

    match set.as_str() {
        "scalars" => {
            let scalars: ScalarOverrides = parse_body(&set, body)?;
            state
                .store
                .replace_scalars(pk, &scalars)
                .await
                .map_err(reject)?;
        }
        "ports" => {
            let ports: Vec<PortSpec> = parse_body(&set, body)?;
            state.store.replace_ports(pk, &ports).await.map_err(reject)?;
        }
        "volumes" => {
            let volumes: Vec<VolumeSpec> = parse_body(&set, body)?;
            state
                .store
                .replace_volumes(pk, &volumes)
                .await
                .map_err(reject)?;
        }
        "env" => {
            let env: Vec<EnvVar> = parse_body(&set, body)?;
            state.store.replace_env(pk, &env).await.map_err(reject)?;
        }
        "labels" => {
            let labels: BTreeMap<String, String> = parse_body(&set, body)?;
            for key in labels.keys() {
                if validation::is_reserved_label(key) {
                    return Err(reject(
                        Error::validation(format!(
                            "label '{}' is in the reserved devarch.* namespace",
                            key
                        ))
                        .with_field("labels"),
                    ));
                }
            }
            state
                .store
                .replace_labels(pk, &labels)
                .await
                .map_err(reject)?;
        }
        "domains" => {
            let domains: Vec<DomainSpec> = parse_body(&set, body)?;
            state
                .store
                .replace_domains(pk, &domains)
                .await
                .map_err(reject)?;
        }
        "healthcheck" => {
            let hc: HealthcheckSpec = parse_body(&set, body)?;
            state
                .store
                .replace_healthcheck(pk, Some(&hc))
                .await
                .map_err(reject)?;
        }
        "deps" => {
            let deps: Vec<String> = parse_body(&set, body)?;
            state.store.replace_deps(pk, &deps).await.map_err(reject)?;
        }
        "config-files" => {
            let files: Vec<ConfigFileSpec> = parse_body(&set, body)?;
            state
                .store
                .replace_config_files(pk, &files)
                .await
                .map_err(reject)?;
        }
        other => {
            return Err(reject(Error::not_found(format!(
                "unknown override set '{}'",
                other
            ))));
        }
    }

    state.publish_mutation(&stack);
    let overrides = state.store.get_overrides(pk).await.map_err(reject)?;
    Ok(warp::reply::json(&overrides))
}

/// DELETE — clear one override set so the template applies again.
pub async fn delete(
    stack: String,
    instance_id: String,
    set: String,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    let instance = state
        .store
        .require_instance(&stack, &instance_id)
        .await
        .map_err(reject)?;
    let pk = instance.id.as_str();

    match set.as_str() {
        "scalars" => state
            .store
            .replace_scalars(pk, &ScalarOverrides::default())
            .await
            .map_err(reject)?,
        "ports" => state.store.replace_ports(pk, &[]).await.map_err(reject)?,
        "volumes" => state.store.replace_volumes(pk, &[]).await.map_err(reject)?,
        "env" => state.store.replace_env(pk, &[]).await.map_err(reject)?,
        "labels" => state
            .store
            .replace_labels(pk, &BTreeMap::new())
            .await
            .map_err(reject)?,
        "domains" => state.store.replace_domains(pk, &[]).await.map_err(reject)?,
        "healthcheck" => state
            .store
            .replace_healthcheck(pk, None)
            .await
            .map_err(reject)?,
        "deps" => state.store.replace_deps(pk, &[]).await.map_err(reject)?,
        "config-files" => state
            .store
            .replace_config_files(pk, &[])
            .await
            .map_err(reject)?,
        other => {
            return Err(reject(Error::not_found(format!(
                "unknown override set '{}'",
                other
            ))));
        }
    }

    state.publish_mutation(&stack);
    Ok(StatusCode::NO_CONTENT)
}
