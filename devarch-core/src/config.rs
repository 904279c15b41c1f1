use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Process-wide settings. Loaded from a TOML file under the user config
/// directory, then overlaid with environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Pin to "docker" or "podman"; empty means auto-detect.
    pub runtime: String,
    /// Base directory for materialized stack configs.
    pub compose_root: String,
    /// Absolute host path used to resolve relative bind-mount sources.
    pub host_project_root: Option<String>,
    /// Path to the symmetric key file for at-rest secret encryption.
    pub secrets_key_path: Option<String>,
    /// Advisory lock deadline in seconds.
    pub lock_ttl_secs: u64,
    /// SQLite database location.
    pub database_path: String,
    /// HTTP listen address for the daemon.
    pub listen_addr: String,
    /// Deadline for individual engine calls, seconds.
    pub engine_timeout_secs: u64,
    /// Deadline for a whole compose-up, seconds.
    pub apply_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            runtime: String::new(),
            compose_root: "./compose".to_string(),
            host_project_root: None,
            secrets_key_path: None,
            lock_ttl_secs: 300,
            database_path: "~/.local/share/devarch/devarch.db".to_string(),
            listen_addr: "127.0.0.1:7340".to_string(),
            engine_timeout_secs: 30,
            apply_timeout_secs: 600,
        }
    }
}

impl Settings {
    /// Load settings from `config_path` (or the default location), creating
    /// the default file when absent, then apply environment overrides.
    pub async fn load(config_path: Option<&str>) -> Result<Self> {
        let path = match config_path {
            Some(p) => PathBuf::from(shellexpand::tilde(p).to_string()),
            None => {
                let config_dir = dirs::config_dir()
                    .ok_or_else(|| anyhow::anyhow!("could not find config directory"))?;
                config_dir.join("devarch").join("devarch.toml")
            }
        };

        let mut settings = if path.exists() {
            let content = tokio::fs::read_to_string(&path).await?;
            toml::from_str(&content)?
        } else {
            let settings = Settings::default();
            settings.save(&path).await?;
            settings
        };

        settings.apply_env();
        Ok(settings)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Recognized environment keys win over the file.
    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("RUNTIME") {
            self.runtime = v;
        }
        if let Ok(v) = std::env::var("COMPOSE_ROOT") {
            self.compose_root = v;
        }
        if let Ok(v) = std::env::var("HOST_PROJECT_ROOT") {
            self.host_project_root = Some(v);
        }
        if let Ok(v) = std::env::var("SECRETS_KEY_PATH") {
            self.secrets_key_path = Some(v);
        }
        if let Ok(v) = std::env::var("LOCK_TTL") {
            if let Ok(secs) = v.parse() {
                self.lock_ttl_secs = secs;
            }
        }
    }

    /// Expanded compose root.
    pub fn compose_root_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.compose_root).to_string())
    }

    /// Expanded database path.
    pub fn database_path_expanded(&self) -> String {
        shellexpand::tilde(&self.database_path).to_string()
    }

    pub fn host_project_root_path(&self) -> Option<PathBuf> {
        self.host_project_root
            .as_ref()
            .map(|p| PathBuf::from(shellexpand::tilde(p).to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let settings = Settings::default();
        assert!(settings.runtime.is_empty());
        assert_eq!(settings.compose_root, "./compose");
        assert_eq!(settings.lock_ttl_secs, 300);
    }

    #[tokio::test]
    async fn save_and_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devarch.toml");

        let mut settings = Settings::default();
        settings.runtime = "docker".to_string();
        settings.lock_ttl_secs = 42;
        settings.save(&path).await.unwrap();

        let loaded = Settings::load(Some(path.to_str().unwrap())).await.unwrap();
        assert_eq!(loaded.lock_ttl_secs, 42);
    }
}
