use serde::Serialize;
use warp::{Rejection, Reply};

use crate::state::AppState;

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    engine: String,
    engine_ok: bool,
    database_ok: bool,
}

#[derive(Debug, Serialize)]
pub struct DoctorCheck {
    pub name: &'static str,
    pub ok: bool,
    pub detail: String,
}

/// GET `/healthz` — liveness: store and engine both answer.
pub async fn healthz(state: AppState) -> Result<impl Reply, Rejection> {
    let database_ok = state.store.ping().await.is_ok();
    let engine_ok = state.runtime.ping().await.is_ok();
    let status = if database_ok && engine_ok { "ok" } else { "degraded" };
    Ok(warp::reply::json(&Health {
        status,
        engine: state.runtime.kind().as_str().to_string(),
        engine_ok,
        database_ok,
    }))
}

/// GET `/doctor` — diagnostics for the usual local-setup failures: socket
/// reachability, compose root permissions, secrets key file.
pub async fn doctor(state: AppState) -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&run_checks(&state).await))
}

pub async fn run_checks(state: &AppState) -> Vec<DoctorCheck> {
    let mut checks = Vec::new();

    match state.runtime.ping().await {
        Ok(()) => checks.push(DoctorCheck {
            name: "engine",
            ok: true,
            detail: format!("{} answered ping", state.runtime.kind().as_str()),
        }),
        Err(e) => checks.push(DoctorCheck {
            name: "engine",
            ok: false,
            detail: e.to_string(),
        }),
    }

    match state.store.ping().await {
        Ok(()) => checks.push(DoctorCheck {
            name: "database",
            ok: true,
            detail: "store reachable".to_string(),
        }),
        Err(e) => checks.push(DoctorCheck {
            name: "database",
            ok: false,
            detail: e.to_string(),
        }),
    }

    let compose_root = state.settings.compose_root_path();
    let probe = compose_root.join("stacks").join(".doctor-probe");
    let writable = tokio::fs::create_dir_all(&probe).await.is_ok();
    if writable {
        let _ = tokio::fs::remove_dir_all(&probe).await;
    }
    checks.push(DoctorCheck {
        name: "compose-root",
        ok: writable,
        detail: if writable {
            format!("{} is writable", compose_root.display())
        } else {
            format!("cannot write under {}", compose_root.display())
        },
    });

    match &state.settings.secrets_key_path {
        Some(path) => {
            let readable = tokio::fs::metadata(path).await.is_ok();
            checks.push(DoctorCheck {
                name: "secrets-key",
                ok: readable,
                detail: if readable {
                    format!("key file present at {}", path)
                } else {
                    format!("key file missing at {}", path)
                },
            });
        }
        None => checks.push(DoctorCheck {
            name: "secrets-key",
            ok: true,
            detail: "no key configured; secret env values stay plaintext at rest".to_string(),
        }),
    }

    checks
}
