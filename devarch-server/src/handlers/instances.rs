use serde::{Deserialize, Serialize};
use warp::http::StatusCode;
use warp::{Rejection, Reply};

use devarch_core::types::{Instance, OverrideSet};

use crate::reject::reject;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AddInstanceBody {
    pub instance: String,
    pub template: String,
}

#[derive(Debug, Serialize)]
pub struct InstanceDetail {
    #[serde(flatten)]
    pub instance: Instance,
    pub template: String,
    pub container_name: String,
    pub overrides: OverrideSet,
}

pub async fn list(stack: String, state: AppState) -> Result<impl Reply, Rejection> {
    let stack_row = state.store.require_stack(&stack).await.map_err(reject)?;
    let instances = state
        .store
        .list_instances(&stack_row.id)
        .await
        .map_err(reject)?;
    Ok(warp::reply::json(&instances))
}

pub async fn add(
    stack: String,
    body: AddInstanceBody,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    let instance = state
        .store
        .add_instance(&stack, &body.instance, &body.template)
        .await
        .map_err(reject)?;
    state.publish_mutation(&stack);
    Ok(warp::reply::with_status(
        warp::reply::json(&instance),
        StatusCode::CREATED,
    ))
}

pub async fn detail(
    stack: String,
    instance_id: String,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    let instance = state
        .store
        .require_instance(&stack, &instance_id)
        .await
        .map_err(reject)?;
    let template = state
        .store
        .get_template(&instance.template_id)
        .await
        .map_err(reject)?
        .map(|t| t.name)
        .unwrap_or_default();
    let overrides = state
        .store
        .get_overrides(&instance.id)
        .await
        .map_err(reject)?;
    let container_name = devarch_core::validation::container_name(&stack, &instance_id);
    Ok(warp::reply::json(&InstanceDetail {
        instance,
        template,
        container_name,
        overrides,
    }))
}

pub async fn remove(
    stack: String,
    instance_id: String,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    state
        .store
        .remove_instance(&stack, &instance_id)
        .await
        .map_err(reject)?;
    state.publish_mutation(&stack);
    Ok(StatusCode::NO_CONTENT)
}
