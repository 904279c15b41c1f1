use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::EffectiveConfig;

const DEFAULT_FILE_MODE: u32 = 0o644;
const DIR_MODE: u32 = 0o755;

/// Writes per-instance config files under `{root}/stacks/{stack}/…`,
/// atomically per stack: everything lands in a sibling temp directory first
/// and swaps in only when complete. The previous content is kept aside until
/// the caller commits, so a failed apply can roll back.
#[derive(Clone)]
pub struct Materializer {
    root: PathBuf,
}

/// Result of a successful swap. Exactly one of `commit` or `rollback` must
/// be called; the previous directory stays on disk until then.
#[derive(Debug)]
pub struct MaterializeGuard {
    final_dir: PathBuf,
    prev_dir: Option<PathBuf>,
    moved_instances: Vec<String>,
}

impl Materializer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn stack_dir(&self, stack: &str) -> PathBuf {
        self.root.join("stacks").join(stack)
    }

    pub fn compose_file(&self, stack: &str) -> PathBuf {
        self.stack_dir(stack).join("compose.yaml")
    }

    fn tmp_dir(&self, stack: &str) -> PathBuf {
        self.root.join("stacks").join(format!(".tmp-{}", stack))
    }

    fn prev_dir(&self, stack: &str) -> PathBuf {
        self.root.join("stacks").join(format!(".prev-{}", stack))
    }

    /// Materialize the config files of every enabled instance. On any
    /// failure the temp directory is removed and the previous final
    /// directory is left untouched.
    pub async fn materialize(
        &self,
        stack: &str,
        configs: &[EffectiveConfig],
    ) -> Result<MaterializeGuard> {
        let tmp = self.tmp_dir(stack);
        if tmp.exists() {
            tokio::fs::remove_dir_all(&tmp).await?;
        }

        match self.write_tree(&tmp, configs).await {
            Ok(()) => {}
            Err(e) => {
                let _ = tokio::fs::remove_dir_all(&tmp).await;
                return Err(e);
            }
        }

        match self.swap(stack, &tmp, configs).await {
            Ok(guard) => Ok(guard),
            Err(e) => {
                let _ = tokio::fs::remove_dir_all(&tmp).await;
                Err(e)
            }
        }
    }

    async fn write_tree(&self, tmp: &Path, configs: &[EffectiveConfig]) -> Result<()> {
        create_dir_with_mode(tmp).await?;
        for config in configs.iter().filter(|c| c.enabled) {
            let instance_dir = tmp.join(&config.instance_id);
            create_dir_with_mode(&instance_dir).await?;
            for file in &config.config_files {
                let rel = sanitize_rel_path(&file.path)?;
                let dest = instance_dir.join(&rel);
                if let Some(parent) = dest.parent() {
                    create_dir_with_mode(parent).await?;
                }
                tokio::fs::write(&dest, &file.content).await?;
                set_mode(&dest, file.mode.unwrap_or(DEFAULT_FILE_MODE)).await?;
            }
        }
        Ok(())
    }

    /// Move current instance directories aside, then move the new ones in.
    /// Top-level files in the stack dir (compose.yaml, exported manifests)
    /// survive the swap; instance directories that no longer exist stay in
    /// the aside directory and disappear at commit.
    async fn swap(
        &self,
        stack: &str,
        tmp: &Path,
        configs: &[EffectiveConfig],
    ) -> Result<MaterializeGuard> {
        let final_dir = self.stack_dir(stack);
        let prev = self.prev_dir(stack);
        if prev.exists() {
            tokio::fs::remove_dir_all(&prev).await?;
        }
        create_dir_with_mode(&final_dir).await?;
        create_dir_with_mode(&prev).await?;

        let mut moved = Vec::new();
        let mut entries = tokio::fs::read_dir(&final_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                let name = entry.file_name().to_string_lossy().into_owned();
                tokio::fs::rename(entry.path(), prev.join(&name)).await?;
                moved.push(name);
            }
        }

        for config in configs.iter().filter(|c| c.enabled) {
            let from = tmp.join(&config.instance_id);
            let to = final_dir.join(&config.instance_id);
            tokio::fs::rename(&from, &to).await?;
        }
        tokio::fs::remove_dir_all(tmp).await?;

        Ok(MaterializeGuard {
            final_dir,
            prev_dir: Some(prev),
            moved_instances: moved,
        })
    }

    /// Best-effort cleanup of a cancelled materialization.
    pub async fn cleanup_temp(&self, stack: &str) {
        let tmp = self.tmp_dir(stack);
        if tmp.exists() {
            let _ = tokio::fs::remove_dir_all(&tmp).await;
        }
    }
}

impl MaterializeGuard {
    pub fn stack_dir(&self) -> &Path {
        &self.final_dir
    }

    /// Keep the new content, drop the previous.
    pub async fn commit(mut self) -> Result<()> {
        if let Some(prev) = self.prev_dir.take() {
            if prev.exists() {
                tokio::fs::remove_dir_all(&prev).await?;
            }
        }
        Ok(())
    }

    /// Restore the previous instance directories and discard the new ones.
    pub async fn rollback(mut self) -> Result<()> {
        let Some(prev) = self.prev_dir.take() else {
            return Ok(());
        };
        if !prev.exists() {
            return Ok(());
        }

        let mut entries = tokio::fs::read_dir(&self.final_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(entry.path()).await?;
            }
        }
        for name in &self.moved_instances {
            let from = prev.join(name);
            if from.exists() {
                tokio::fs::rename(&from, self.final_dir.join(name)).await?;
            }
        }
        tokio::fs::remove_dir_all(&prev).await?;
        Ok(())
    }
}

async fn create_dir_with_mode(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path).await?;
    set_mode(path, DIR_MODE).await
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(mode);
    tokio::fs::set_permissions(path, perms).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

/// Config file paths stay inside the instance directory.
fn sanitize_rel_path(raw: &str) -> Result<PathBuf> {
    let path = Path::new(raw);
    if path.is_absolute() {
        return Err(Error::validation(format!(
            "config file path '{}' must be relative",
            raw
        ))
        .with_field("path"));
    }
    for component in path.components() {
        if matches!(component, std::path::Component::ParentDir) {
            return Err(Error::validation(format!(
                "config file path '{}' must not contain '..'",
                raw
            ))
            .with_field("path"));
        }
    }
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConfigFileSpec;
    use std::collections::BTreeMap;

    fn config(id: &str, files: Vec<ConfigFileSpec>) -> EffectiveConfig {
        EffectiveConfig {
            stack_name: "a".into(),
            instance_id: id.into(),
            container_name: format!("devarch-a-{}", id),
            template_name: "tpl".into(),
            template_version: 1,
            enabled: true,
            image: "img".into(),
            restart_policy: None,
            command: None,
            user: None,
            ports: vec![],
            volumes: vec![],
            env: BTreeMap::new(),
            labels: BTreeMap::new(),
            domains: vec![],
            healthcheck: None,
            config_files: files,
            depends_on: vec![],
        }
    }

    fn file(path: &str, content: &str) -> ConfigFileSpec {
        ConfigFileSpec {
            path: path.into(),
            content: content.into(),
            mode: None,
        }
    }

    #[tokio::test]
    async fn materializes_instance_files() {
        let dir = tempfile::tempdir().unwrap();
        let mat = Materializer::new(dir.path());
        let configs = vec![config("web", vec![file("nginx/app.conf", "server {}")])];

        let guard = mat.materialize("a", &configs).await.unwrap();
        let written = dir.path().join("stacks/a/web/nginx/app.conf");
        assert_eq!(std::fs::read_to_string(&written).unwrap(), "server {}");
        guard.commit().await.unwrap();

        assert!(!dir.path().join("stacks/.tmp-a").exists());
        assert!(!dir.path().join("stacks/.prev-a").exists());
    }

    #[tokio::test]
    async fn swap_replaces_old_content_and_prunes_removed_instances() {
        let dir = tempfile::tempdir().unwrap();
        let mat = Materializer::new(dir.path());

        let first = vec![
            config("web", vec![file("a.conf", "one")]),
            config("db", vec![file("db.conf", "db")]),
        ];
        mat.materialize("a", &first).await.unwrap().commit().await.unwrap();

        let second = vec![config("web", vec![file("a.conf", "two")])];
        mat.materialize("a", &second).await.unwrap().commit().await.unwrap();

        let written = dir.path().join("stacks/a/web/a.conf");
        assert_eq!(std::fs::read_to_string(&written).unwrap(), "two");
        assert!(!dir.path().join("stacks/a/db").exists());
    }

    #[tokio::test]
    async fn rollback_restores_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let mat = Materializer::new(dir.path());

        let first = vec![config("web", vec![file("a.conf", "one")])];
        mat.materialize("a", &first).await.unwrap().commit().await.unwrap();

        let second = vec![config("web", vec![file("a.conf", "two")])];
        let guard = mat.materialize("a", &second).await.unwrap();
        guard.rollback().await.unwrap();

        let written = dir.path().join("stacks/a/web/a.conf");
        assert_eq!(std::fs::read_to_string(&written).unwrap(), "one");
        assert!(!dir.path().join("stacks/.prev-a").exists());
    }

    #[tokio::test]
    async fn rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let mat = Materializer::new(dir.path());
        let configs = vec![config("web", vec![file("../escape.conf", "x")])];

        let err = mat.materialize("a", &configs).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Validation);
        assert!(!dir.path().join("stacks/.tmp-a").exists());
    }

    #[tokio::test]
    async fn top_level_files_survive_swap() {
        let dir = tempfile::tempdir().unwrap();
        let mat = Materializer::new(dir.path());

        let first = vec![config("web", vec![file("a.conf", "one")])];
        mat.materialize("a", &first).await.unwrap().commit().await.unwrap();
        std::fs::write(dir.path().join("stacks/a/compose.yaml"), "services: {}").unwrap();

        let second = vec![config("web", vec![file("a.conf", "two")])];
        mat.materialize("a", &second).await.unwrap().commit().await.unwrap();

        assert!(dir.path().join("stacks/a/compose.yaml").exists());
    }
}
