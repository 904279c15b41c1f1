use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use devarch_core::apply::write_atomic;
use devarch_core::config::Settings;
use devarch_core::error::{Error, Result};
use devarch_core::manifest::{self, Manifest};
use devarch_core::secrets::SecretsBox;
use devarch_core::store::Store;
use devarch_core::{lockfile, plan as core_plan};
use devarch_server::AppState;

pub mod stack;

/// Exit codes per the CLI contract; anyhow-level failures land on 1.
pub fn exit_code(err: &Error) -> i32 {
    err.kind.exit_code()
}

pub(crate) async fn load_settings(config: Option<&str>) -> Result<Settings> {
    Settings::load(config)
        .await
        .map_err(|e| Error::validation(format!("failed to load settings: {}", e)))
}

pub(crate) async fn open_store(settings: &Settings) -> Result<Store> {
    let store = Store::new(&settings.database_path).await?;
    if let Some(key_path) = &settings.secrets_key_path {
        let path = PathBuf::from(shellexpand::tilde(key_path).to_string());
        if path.exists() {
            let secrets = SecretsBox::load(&path).await?;
            return Ok(store.with_secrets(Arc::new(secrets)));
        }
        warn!(path = %path.display(), "secrets key path configured but file missing");
    }
    Ok(store)
}

/// Full state: settings, store, and a selected container engine.
pub(crate) async fn open_state(config: Option<&str>) -> Result<AppState> {
    let settings = load_settings(config).await?;
    let store = open_store(&settings).await?;
    let runtime = devarch_runtime::select_runtime(&settings.runtime).await?;
    Ok(AppState::new(store, runtime, settings))
}

/// Break expired advisory locks on an interval. Only this sweep may break a
/// lock; a normal apply never does.
pub(crate) fn spawn_lock_supervisor(store: Store, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match store.break_expired_locks().await {
                Ok(broken) if !broken.is_empty() => {
                    warn!(count = broken.len(), "broke expired stack locks");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "lock supervisor sweep failed"),
            }
        }
    })
}

pub async fn serve(config: Option<&str>, listen: Option<&str>) -> Result<()> {
    let state = open_state(config).await?;
    let addr_text = listen.unwrap_or(&state.settings.listen_addr).to_string();
    let addr: std::net::SocketAddr = addr_text
        .parse()
        .map_err(|e| Error::validation(format!("invalid listen address '{}': {}", addr_text, e)))?;

    let supervisor = spawn_lock_supervisor(state.store.clone(), Duration::from_secs(30));
    info!(%addr, "starting devarch server");
    devarch_server::serve(state, addr, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    })
    .await;
    supervisor.abort();
    Ok(())
}

pub async fn doctor(config: Option<&str>) -> Result<()> {
    let settings = load_settings(config).await?;
    let store = open_store(&settings).await?;

    // The doctor must report an unreachable engine, not die on it.
    match devarch_runtime::select_runtime(&settings.runtime).await {
        Ok(runtime) => {
            let state = AppState::new(store, runtime, settings);
            let checks = devarch_server::handlers::system::run_checks(&state).await;
            let mut failed = false;
            for check in &checks {
                let mark = if check.ok { "ok " } else { "FAIL" };
                println!("[{}] {:<14} {}", mark, check.name, check.detail);
                failed |= !check.ok;
            }
            if failed {
                return Err(Error::engine_unavailable("one or more doctor checks failed"));
            }
            Ok(())
        }
        Err(e) => {
            println!("[FAIL] engine         {}", e);
            Err(e)
        }
    }
}

pub async fn plan(config: Option<&str>, stack: &str) -> Result<()> {
    let state = open_state(config).await?;
    let plan = core_plan::build_plan(
        &state.store,
        state.runtime.as_ref(),
        &state.inspect_cache,
        stack,
    )
    .await?;

    println!("plan for stack '{}'", plan.stack);
    println!("fingerprint: {}", plan.fingerprint);
    for action in &plan.actions {
        println!("  {:?} {} ({})", action.kind, action.instance_id, action.reason);
    }
    for diagnostic in &plan.diagnostics {
        println!("  warning: {}", diagnostic.message);
    }
    if plan.actions.is_empty() {
        println!("  nothing to do");
    }
    Ok(())
}

pub async fn apply(config: Option<&str>, stack: &str, fingerprint: Option<&str>) -> Result<()> {
    let state = open_state(config).await?;
    let fingerprint = match fingerprint {
        Some(f) => f.to_string(),
        None => {
            core_plan::build_plan(
                &state.store,
                state.runtime.as_ref(),
                &state.inspect_cache,
                stack,
            )
            .await?
            .fingerprint
        }
    };

    let report = state.apply.apply(stack, &fingerprint).await?;
    println!(
        "applied stack '{}' ({} actions, {} ms)",
        report.stack,
        report.actions.len(),
        report.duration_ms
    );
    for diagnostic in &report.diagnostics {
        println!("  warning: {}", diagnostic.message);
    }
    Ok(())
}

pub async fn export(config: Option<&str>, stack: &str, out: Option<&str>) -> Result<()> {
    let settings = load_settings(config).await?;
    let store = open_store(&settings).await?;

    let manifest = manifest::export_manifest(&store, stack).await?;
    let lock = lockfile::export_lockfile(&store, stack).await?;

    let out_dir = match out {
        Some(dir) => PathBuf::from(dir),
        None => settings.compose_root_path().join("stacks").join(stack),
    };
    let manifest_path = out_dir.join("devarch.yml");
    let lock_path = out_dir.join("devarch.lock");
    write_atomic(&manifest_path, manifest.to_yaml()?.as_bytes()).await?;
    write_atomic(&lock_path, lock.to_yaml()?.as_bytes()).await?;

    println!("wrote {}", manifest_path.display());
    println!("wrote {}", lock_path.display());
    Ok(())
}

pub async fn import(config: Option<&str>, file: &str) -> Result<()> {
    let settings = load_settings(config).await?;
    let store = open_store(&settings).await?;

    let yaml = tokio::fs::read_to_string(Path::new(file)).await?;
    let manifest = Manifest::from_yaml(&yaml)?;
    let report = store.import_manifest(&manifest).await?;

    println!(
        "imported stack '{}' ({} created, {} updated instances)",
        report.stack,
        report.created_instances.len(),
        report.updated_instances.len()
    );
    Ok(())
}

pub async fn config_show(config: Option<&str>) -> Result<()> {
    let settings = load_settings(config).await?;
    let rendered = toml::to_string_pretty(&settings)
        .map_err(|e| Error::internal(format!("failed to render settings: {}", e)))?;
    println!("{}", rendered);
    Ok(())
}

pub async fn config_init(config: Option<&str>) -> Result<()> {
    let settings = load_settings(config).await?;
    println!(
        "configuration ready (compose root: {})",
        settings.compose_root
    );
    Ok(())
}
