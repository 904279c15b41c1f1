use serde::{Deserialize, Serialize};
use warp::{Rejection, Reply};

use devarch_core::plan as core_plan;
use devarch_core::types::Diagnostic;
use devarch_core::{compose, resolver, validation};

use crate::reject::reject;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ApplyBody {
    pub fingerprint: String,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_tail")]
    pub tail: usize,
}

fn default_tail() -> usize {
    100
}

#[derive(Debug, Serialize)]
pub struct ComposePreview {
    pub yaml: String,
    pub diagnostics: Vec<Diagnostic>,
}

/// GET `/stacks/{name}/instances/{instance}/effective` — the resolver
/// output for one instance.
pub async fn effective(
    stack: String,
    instance_id: String,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    let config = resolver::resolve_instance(&state.store, &stack, &instance_id)
        .await
        .map_err(reject)?;
    Ok(warp::reply::json(&config))
}

/// GET `/stacks/{name}/compose` — current generator output, not applied.
pub async fn compose_preview(stack: String, state: AppState) -> Result<impl Reply, Rejection> {
    let stack_row = state.store.require_stack(&stack).await.map_err(reject)?;
    let configs = resolver::resolve_stack(&state.store, &stack)
        .await
        .map_err(reject)?;
    let generated = compose::generate(
        &stack_row,
        &configs,
        state.settings.host_project_root_path().as_deref(),
    )
    .map_err(reject)?;
    Ok(warp::reply::json(&ComposePreview {
        yaml: generated.yaml,
        diagnostics: generated.diagnostics,
    }))
}

/// POST `/stacks/{name}/plan` — structured diff plus fingerprint.
pub async fn plan(stack: String, state: AppState) -> Result<impl Reply, Rejection> {
    let plan = core_plan::build_plan(
        &state.store,
        state.runtime.as_ref(),
        &state.inspect_cache,
        &stack,
    )
    .await
    .map_err(reject)?;
    state.plans.put(plan.clone()).await;
    Ok(warp::reply::json(&plan))
}

/// POST `/stacks/{name}/apply` — execute the plan named by its fingerprint.
pub async fn apply(
    stack: String,
    body: ApplyBody,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    let report = state
        .apply
        .apply(&stack, &body.fingerprint)
        .await
        .map_err(reject)?;
    Ok(warp::reply::json(&report))
}

pub async fn logs(
    stack: String,
    instance_id: String,
    query: LogsQuery,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    state.store.require_instance(&stack, &instance_id).await.map_err(reject)?;
    let name = validation::container_name(&stack, &instance_id);
    let logs = state
        .runtime
        .logs(&name, query.tail)
        .await
        .map_err(reject)?;
    Ok(warp::reply::json(&serde_json::json!({
        "container": name,
        "logs": logs,
    })))
}

pub async fn stats(
    stack: String,
    instance_id: String,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    state.store.require_instance(&stack, &instance_id).await.map_err(reject)?;
    let name = validation::container_name(&stack, &instance_id);
    let stats = state.runtime.stats(&name).await.map_err(reject)?;
    Ok(warp::reply::json(&stats))
}
