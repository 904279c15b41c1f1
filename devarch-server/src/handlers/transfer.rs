use serde::{Deserialize, Serialize};
use warp::{Rejection, Reply};

use devarch_core::manifest::{self, Manifest};
use devarch_core::lockfile;

use crate::reject::reject;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ExportResponse {
    pub manifest: String,
    pub lockfile: String,
}

#[derive(Debug, Deserialize)]
pub struct ImportBody {
    /// YAML text of a `devarch.yml` manifest.
    pub manifest: String,
}

/// GET `/stacks/{name}/export` — manifest plus lockfile, both as YAML text.
pub async fn export(stack: String, state: AppState) -> Result<impl Reply, Rejection> {
    let manifest = manifest::export_manifest(&state.store, &stack)
        .await
        .map_err(reject)?;
    let lockfile = lockfile::export_lockfile(&state.store, &stack)
        .await
        .map_err(reject)?;
    Ok(warp::reply::json(&ExportResponse {
        manifest: manifest.to_yaml().map_err(reject)?,
        lockfile: lockfile.to_yaml().map_err(reject)?,
    }))
}

/// POST `/stacks/import` — create-update import; never deletes.
pub async fn import(body: ImportBody, state: AppState) -> Result<impl Reply, Rejection> {
    let manifest = Manifest::from_yaml(&body.manifest).map_err(reject)?;
    let report = state
        .store
        .import_manifest(&manifest)
        .await
        .map_err(reject)?;
    state.publish_mutation(&report.stack);
    Ok(warp::reply::json(&report))
}
