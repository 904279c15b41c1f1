/*!
 * DevArch Daemon (devarchd)
 *
 * Long-running variant of devarch: serves the HTTP surface, sweeps expired
 * stack locks, and shuts down cleanly on SIGINT/SIGTERM.
 */

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use devarch_core::config::Settings;
use devarch_core::secrets::SecretsBox;
use devarch_core::store::Store;
use devarch_server::AppState;

#[derive(Parser)]
#[command(name = "devarchd")]
#[command(about = "DevArch daemon: HTTP surface and background supervisor")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Listen address, overriding the configured one
    #[arg(short, long)]
    listen: Option<String>,

    /// PID file to write at startup
    #[arg(long)]
    pid_file: Option<PathBuf>,
}

struct Daemon {
    state: AppState,
    listen: SocketAddr,
    pid_file: Option<PathBuf>,
}

impl Daemon {
    async fn new(cli: &Cli) -> Result<Self> {
        info!("initializing devarch daemon");

        let settings = Settings::load(cli.config.as_deref())
            .await
            .context("failed to load settings")?;

        let mut store = Store::new(&settings.database_path)
            .await
            .context("failed to open store")?;
        if let Some(key_path) = &settings.secrets_key_path {
            let path = PathBuf::from(shellexpand::tilde(key_path).to_string());
            if path.exists() {
                let secrets = SecretsBox::load(&path)
                    .await
                    .context("failed to load secrets key")?;
                store = store.with_secrets(Arc::new(secrets));
            } else {
                warn!(path = %path.display(), "secrets key path configured but file missing");
            }
        }

        let runtime = devarch_runtime::select_runtime(&settings.runtime)
            .await
            .context("failed to select container engine")?;
        info!(engine = runtime.kind().as_str(), "container engine ready");

        let listen_text = cli
            .listen
            .clone()
            .unwrap_or_else(|| settings.listen_addr.clone());
        let listen = listen_text
            .parse()
            .with_context(|| format!("invalid listen address '{}'", listen_text))?;

        Ok(Self {
            state: AppState::new(store, runtime, settings),
            listen,
            pid_file: cli.pid_file.clone(),
        })
    }

    async fn run(self) -> Result<()> {
        if let Some(pid_file) = &self.pid_file {
            tokio::fs::write(pid_file, std::process::id().to_string())
                .await
                .with_context(|| format!("failed to write pid file {:?}", pid_file))?;
        }

        let supervisor = spawn_lock_supervisor(self.state.store.clone());

        info!(addr = %self.listen, "devarchd serving");
        devarch_server::serve(self.state, self.listen, shutdown_signal()).await;

        supervisor.abort();
        if let Some(pid_file) = &self.pid_file {
            let _ = tokio::fs::remove_file(pid_file).await;
        }
        info!("devarchd stopped");
        Ok(())
    }
}

/// Only this sweep breaks expired advisory locks; a normal apply never does.
fn spawn_lock_supervisor(store: Store) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
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

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let daemon = Daemon::new(&cli).await?;
    daemon.run().await
}
