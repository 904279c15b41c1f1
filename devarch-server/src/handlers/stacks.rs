use serde::{Deserialize, Serialize};
use warp::http::StatusCode;
use warp::{Rejection, Reply};

use devarch_core::types::{Instance, LockRecord, Stack};

use crate::reject::reject;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateStackBody {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub network: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PatchStackBody {
    pub description: Option<String>,
    /// `Some(None)` clears the override back to the derived network name.
    #[serde(default, with = "double_option")]
    pub network: Option<Option<String>>,
}

/// Distinguishes an absent key from an explicit null.
mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(de: D) -> Result<Option<Option<String>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(de).map(Some)
    }
}

#[derive(Debug, Deserialize)]
pub struct CloneStackBody {
    pub target: String,
}

#[derive(Debug, Serialize)]
pub struct StackDetail {
    #[serde(flatten)]
    pub stack: Stack,
    pub network: String,
    pub instances: Vec<Instance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock: Option<LockRecord>,
}

pub async fn list(state: AppState) -> Result<impl Reply, Rejection> {
    let stacks = state.store.list_stacks(false).await.map_err(reject)?;
    Ok(warp::reply::json(&stacks))
}

pub async fn create(body: CreateStackBody, state: AppState) -> Result<impl Reply, Rejection> {
    let stack = state
        .store
        .create_stack(&body.name, &body.description, body.network.as_deref())
        .await
        .map_err(reject)?;
    Ok(warp::reply::with_status(
        warp::reply::json(&stack),
        StatusCode::CREATED,
    ))
}

pub async fn detail(name: String, state: AppState) -> Result<impl Reply, Rejection> {
    let stack = state.store.require_stack(&name).await.map_err(reject)?;
    let instances = state.store.list_instances(&stack.id).await.map_err(reject)?;
    let lock = state.store.get_lock(&stack.id).await.map_err(reject)?;
    let network = stack.network();
    Ok(warp::reply::json(&StackDetail {
        stack,
        network,
        instances,
        lock,
    }))
}

pub async fn patch(
    name: String,
    body: PatchStackBody,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    let network = body.network.as_ref().map(|opt| opt.as_deref());
    let stack = state
        .store
        .update_stack_meta(&name, body.description.as_deref(), network)
        .await
        .map_err(reject)?;
    state.publish_mutation(&name);
    Ok(warp::reply::json(&stack))
}

pub async fn soft_delete(name: String, state: AppState) -> Result<impl Reply, Rejection> {
    state.store.soft_delete_stack(&name).await.map_err(reject)?;
    state.publish_mutation(&name);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn enable(name: String, state: AppState) -> Result<impl Reply, Rejection> {
    let stack = state
        .store
        .set_stack_enabled(&name, true)
        .await
        .map_err(reject)?;
    state.publish_mutation(&name);
    Ok(warp::reply::json(&stack))
}

pub async fn disable(name: String, state: AppState) -> Result<impl Reply, Rejection> {
    let stack = state
        .store
        .set_stack_enabled(&name, false)
        .await
        .map_err(reject)?;
    state.publish_mutation(&name);
    Ok(warp::reply::json(&stack))
}

pub async fn restore(name: String, state: AppState) -> Result<impl Reply, Rejection> {
    let stack = state.store.restore_stack(&name).await.map_err(reject)?;
    Ok(warp::reply::json(&stack))
}

pub async fn clone(
    name: String,
    body: CloneStackBody,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    let stack = state
        .store
        .clone_stack(&name, &body.target)
        .await
        .map_err(reject)?;
    Ok(warp::reply::with_status(
        warp::reply::json(&stack),
        StatusCode::CREATED,
    ))
}
