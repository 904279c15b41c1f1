use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info};

use devarch_core::error::{Error, Result};
use devarch_core::runtime::{ContainerRuntime, RuntimeKind};

use crate::docker::DockerEngine;
use crate::podman::PodmanEngine;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Select the engine once for the process: honor an explicit pin, otherwise
/// probe Docker then Podman with a ping.
pub async fn select_runtime(pin: &str) -> Result<Arc<dyn ContainerRuntime>> {
    if !pin.trim().is_empty() {
        let kind: RuntimeKind = pin.parse()?;
        return connect(kind).await;
    }

    debug!("no runtime pinned, probing docker then podman");
    if let Ok(engine) = probe(RuntimeKind::Docker).await {
        return Ok(engine);
    }
    if let Ok(engine) = probe(RuntimeKind::Podman).await {
        return Ok(engine);
    }

    Err(Error::engine_unavailable(
        "neither docker nor podman answered a ping",
    )
    .with_suggestion("start the engine, or set RUNTIME to pin one explicitly"))
}

async fn connect(kind: RuntimeKind) -> Result<Arc<dyn ContainerRuntime>> {
    let engine: Arc<dyn ContainerRuntime> = match kind {
        RuntimeKind::Docker => Arc::new(DockerEngine::connect().await?),
        RuntimeKind::Podman => Arc::new(PodmanEngine::connect().await?),
    };
    info!(engine = engine.kind().as_str(), "container engine selected");
    Ok(engine)
}

async fn probe(kind: RuntimeKind) -> Result<Arc<dyn ContainerRuntime>> {
    let engine = connect(kind).await?;
    timeout(PROBE_TIMEOUT, engine.ping())
        .await
        .map_err(Error::from)??;
    Ok(engine)
}
