use tokio::process::Command;
use tracing::{debug, warn};

use devarch_core::error::{Error, Result};
use devarch_core::runtime::ComposeOptions;

/// Subprocess wrapper around `docker compose` / `podman compose`. The
/// project name is always the stack name; flag differences between the two
/// frontends are translated here.
#[derive(Debug, Clone)]
pub struct ComposeCli {
    program: String,
    base_args: Vec<String>,
    /// `docker compose` understands `--wait`; podman's compose frontend
    /// does not, so health gating falls back to the compose file conditions.
    supports_wait: bool,
}

impl ComposeCli {
    pub fn docker() -> Self {
        Self {
            program: "docker".to_string(),
            base_args: vec!["compose".to_string()],
            supports_wait: true,
        }
    }

    pub fn podman() -> Self {
        Self {
            program: "podman".to_string(),
            base_args: vec!["compose".to_string()],
            supports_wait: false,
        }
    }

    pub async fn up(&self, opts: &ComposeOptions) -> Result<()> {
        let mut args = self.common_args(opts);
        args.push("up".to_string());
        args.push("-d".to_string());
        if opts.remove_orphans {
            args.push("--remove-orphans".to_string());
        }
        if self.supports_wait {
            if let Some(wait) = opts.wait_timeout {
                args.push("--wait".to_string());
                args.push("--wait-timeout".to_string());
                args.push(wait.as_secs().max(1).to_string());
            }
        }
        self.run(&args).await
    }

    pub async fn down(&self, opts: &ComposeOptions) -> Result<()> {
        let mut args = self.common_args(opts);
        args.push("down".to_string());
        if opts.remove_orphans {
            args.push("--remove-orphans".to_string());
        }
        self.run(&args).await
    }

    fn common_args(&self, opts: &ComposeOptions) -> Vec<String> {
        let mut args = self.base_args.clone();
        args.push("-p".to_string());
        args.push(opts.project.clone());
        args.push("-f".to_string());
        args.push(opts.file.to_string_lossy().into_owned());
        args
    }

    async fn run(&self, args: &[String]) -> Result<()> {
        debug!(program = %self.program, ?args, "invoking compose");
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => Error::engine_unavailable(format!(
                    "'{}' binary not found on PATH",
                    self.program
                ))
                .with_cause(e),
                std::io::ErrorKind::PermissionDenied => {
                    Error::permission_denied(format!("cannot execute '{}'", self.program))
                        .with_cause(e)
                }
                _ => Error::internal(format!("failed to spawn '{}'", self.program)).with_cause(e),
            })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        warn!(program = %self.program, %stderr, "compose invocation failed");
        Err(classify_compose_failure(&stderr))
    }
}

/// Engine-specific failure strings are interpreted once, here, and come out
/// as taxonomy kinds. Callers above this layer only see the kind.
fn classify_compose_failure(stderr: &str) -> Error {
    let lowered = stderr.to_ascii_lowercase();
    let err = if lowered.contains("port is already allocated")
        || lowered.contains("address already in use")
    {
        Error::conflict("a host port in this stack is already bound")
            .with_suggestion("change the colliding host port override")
    } else if lowered.contains("permission denied") {
        Error::permission_denied("compose was denied access to the engine socket")
    } else if lowered.contains("cannot connect")
        || lowered.contains("connection refused")
        || lowered.contains("is the docker daemon running")
        || lowered.contains("no such file or directory")
    {
        Error::engine_unavailable("compose could not reach the container engine")
    } else {
        Error::internal("compose invocation failed")
    };
    err.with_cause(anyhow::anyhow!("{}", stderr.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_collision_classifies_as_conflict() {
        let err = classify_compose_failure(
            "Error response from daemon: Bind for 0.0.0.0:8080 failed: port is already allocated",
        );
        assert_eq!(err.kind, devarch_core::ErrorKind::Conflict);
    }

    #[test]
    fn missing_daemon_classifies_as_unavailable() {
        let err = classify_compose_failure(
            "Cannot connect to the Docker daemon at unix:///var/run/docker.sock",
        );
        assert_eq!(err.kind, devarch_core::ErrorKind::EngineUnavailable);
    }

    #[test]
    fn unknown_failure_is_internal_with_cause() {
        let err = classify_compose_failure("something exploded");
        assert_eq!(err.kind, devarch_core::ErrorKind::Internal);
        assert!(err.cause().is_some());
    }

    #[test]
    fn wait_flags_only_for_docker() {
        let opts = ComposeOptions {
            project: "a".into(),
            file: "/tmp/compose.yaml".into(),
            wait_timeout: Some(std::time::Duration::from_secs(30)),
            remove_orphans: true,
        };
        let docker = ComposeCli::docker();
        let mut args = docker.common_args(&opts);
        args.push("up".into());
        assert!(docker.supports_wait);
        let podman = ComposeCli::podman();
        assert!(!podman.supports_wait);
    }
}
