use std::collections::BTreeMap;

use crate::error::Result;
use crate::secrets;
use crate::types::{
    ConfigFileSpec, DomainSpec, EnvVar, HealthcheckSpec, OverrideSet, PortSpec, Protocol,
    ScalarOverrides, VolumeKind, VolumeSpec,
};

use super::{now_rfc3339, Store};

impl Store {
    /// The full override set of one instance.
    pub async fn get_overrides(&self, instance_pk: &str) -> Result<OverrideSet> {
        let scalar_row = sqlx::query_as::<
            _,
            (Option<String>, Option<String>, Option<String>, Option<String>),
        >(
            "SELECT image, restart_policy, command, run_as FROM override_scalars \
             WHERE instance_pk = ?",
        )
        .bind(instance_pk)
        .fetch_optional(self.pool())
        .await?;
        let scalars = match scalar_row {
            Some((image, restart_policy, command, user)) => ScalarOverrides {
                image,
                restart_policy,
                command: command.as_deref().map(serde_json::from_str).transpose()?,
                user,
            },
            None => ScalarOverrides::default(),
        };

        let port_rows = sqlx::query_as::<_, (Option<i64>, i64, String)>(
            "SELECT host_port, container_port, protocol FROM override_ports \
             WHERE instance_pk = ? ORDER BY position ASC",
        )
        .bind(instance_pk)
        .fetch_all(self.pool())
        .await?;
        let ports = if port_rows.is_empty() {
            None
        } else {
            Some(
                port_rows
                    .into_iter()
                    .map(|(host, container, protocol)| PortSpec {
                        host: host.map(|p| p as u16),
                        container: container as u16,
                        protocol: if protocol == "udp" {
                            Protocol::Udp
                        } else {
                            Protocol::Tcp
                        },
                    })
                    .collect(),
            )
        };

        let volume_rows = sqlx::query_as::<_, (String, String, i64, String)>(
            "SELECT source, target, read_only, kind FROM override_volumes \
             WHERE instance_pk = ? ORDER BY position ASC",
        )
        .bind(instance_pk)
        .fetch_all(self.pool())
        .await?;
        let volumes = if volume_rows.is_empty() {
            None
        } else {
            Some(
                volume_rows
                    .into_iter()
                    .map(|(source, target, read_only, kind)| VolumeSpec {
                        source,
                        target,
                        read_only: read_only != 0,
                        kind: if kind == "named" {
                            VolumeKind::Named
                        } else {
                            VolumeKind::Bind
                        },
                    })
                    .collect(),
            )
        };

        let env_rows = sqlx::query_as::<_, (String, String, i64)>(
            "SELECT key, value, secret FROM override_env WHERE instance_pk = ? ORDER BY key ASC",
        )
        .bind(instance_pk)
        .fetch_all(self.pool())
        .await?;
        let mut env = Vec::with_capacity(env_rows.len());
        for (key, value, secret) in env_rows {
            let secret = secret != 0;
            let value = if secret && secrets::is_sealed(&value) {
                match self.secrets() {
                    Some(sb) => sb.open(&value)?,
                    None => {
                        tracing::warn!(key, "secret env value present but no key configured");
                        value
                    }
                }
            } else {
                value
            };
            env.push(EnvVar { key, value, secret });
        }

        let label_rows = sqlx::query_as::<_, (String, String)>(
            "SELECT key, value FROM override_labels WHERE instance_pk = ? ORDER BY key ASC",
        )
        .bind(instance_pk)
        .fetch_all(self.pool())
        .await?;
        let labels: BTreeMap<String, String> = label_rows.into_iter().collect();

        let domain_rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT host, port FROM override_domains WHERE instance_pk = ? ORDER BY position ASC",
        )
        .bind(instance_pk)
        .fetch_all(self.pool())
        .await?;
        let domains = if domain_rows.is_empty() {
            None
        } else {
            Some(
                domain_rows
                    .into_iter()
                    .map(|(host, port)| DomainSpec {
                        host,
                        port: port as u16,
                    })
                    .collect(),
            )
        };

        let healthcheck_row = sqlx::query_as::<_, (String, i64, i64, i64, i64)>(
            "SELECT test, interval_secs, timeout_secs, retries, start_period_secs \
             FROM override_healthcheck WHERE instance_pk = ?",
        )
        .bind(instance_pk)
        .fetch_optional(self.pool())
        .await?;
        let healthcheck = healthcheck_row
            .map(|(test, interval, timeout, retries, start_period)| {
                Ok::<_, crate::error::Error>(HealthcheckSpec {
                    test: serde_json::from_str(&test)?,
                    interval_secs: interval as u64,
                    timeout_secs: timeout as u64,
                    retries: retries as u32,
                    start_period_secs: start_period as u64,
                })
            })
            .transpose()?;

        let dep_rows = sqlx::query_as::<_, (String,)>(
            "SELECT depends_on FROM override_deps WHERE instance_pk = ? ORDER BY position ASC",
        )
        .bind(instance_pk)
        .fetch_all(self.pool())
        .await?;
        let depends_on = dep_rows.into_iter().map(|(d,)| d).collect();

        let file_rows = sqlx::query_as::<_, (String, String, Option<i64>)>(
            "SELECT path, content, mode FROM override_config_files \
             WHERE instance_pk = ? ORDER BY path ASC",
        )
        .bind(instance_pk)
        .fetch_all(self.pool())
        .await?;
        let config_files = file_rows
            .into_iter()
            .map(|(path, content, mode)| ConfigFileSpec {
                path,
                content,
                mode: mode.map(|m| m as u32),
            })
            .collect();

        Ok(OverrideSet {
            scalars,
            ports,
            volumes,
            env,
            labels,
            domains,
            healthcheck,
            depends_on,
            config_files,
        })
    }

    /// Replace the scalar override set (image, restart policy, command,
    /// user). An all-empty set clears the row so the template scalars apply
    /// again.
    pub async fn replace_scalars(
        &self,
        instance_pk: &str,
        scalars: &ScalarOverrides,
    ) -> Result<()> {
        let command_json = scalars
            .command
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM override_scalars WHERE instance_pk = ?")
            .bind(instance_pk)
            .execute(&mut *tx)
            .await?;
        if !scalars.is_empty() {
            sqlx::query(
                "INSERT INTO override_scalars (instance_pk, image, restart_policy, command, run_as) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(instance_pk)
            .bind(&scalars.image)
            .bind(&scalars.restart_policy)
            .bind(&command_json)
            .bind(&scalars.user)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        self.touch_instance(instance_pk).await
    }

    /// Replace the port override set. An empty slice clears the override so
    /// the template ports apply again.
    pub async fn replace_ports(&self, instance_pk: &str, ports: &[PortSpec]) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM override_ports WHERE instance_pk = ?")
            .bind(instance_pk)
            .execute(&mut *tx)
            .await?;
        for (position, port) in ports.iter().enumerate() {
            sqlx::query(
                "INSERT INTO override_ports (instance_pk, position, host_port, container_port, protocol) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(instance_pk)
            .bind(position as i64)
            .bind(port.host.map(|p| p as i64))
            .bind(port.container as i64)
            .bind(port.protocol.as_str())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        self.touch_instance(instance_pk).await
    }

    pub async fn replace_volumes(&self, instance_pk: &str, volumes: &[VolumeSpec]) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM override_volumes WHERE instance_pk = ?")
            .bind(instance_pk)
            .execute(&mut *tx)
            .await?;
        for (position, volume) in volumes.iter().enumerate() {
            let kind = match volume.kind {
                VolumeKind::Bind => "bind",
                VolumeKind::Named => "named",
            };
            sqlx::query(
                "INSERT INTO override_volumes (instance_pk, position, source, target, read_only, kind) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(instance_pk)
            .bind(position as i64)
            .bind(&volume.source)
            .bind(&volume.target)
            .bind(volume.read_only as i64)
            .bind(kind)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        self.touch_instance(instance_pk).await
    }

    /// Replace the env override set. Secret values are sealed at rest when a
    /// key is configured.
    pub async fn replace_env(&self, instance_pk: &str, env: &[EnvVar]) -> Result<()> {
        let mut sealed = Vec::with_capacity(env.len());
        for var in env {
            let value = if var.secret && !var.value.is_empty() && !secrets::is_sealed(&var.value) {
                match self.secrets() {
                    Some(sb) => sb.seal(&var.value)?,
                    None => var.value.clone(),
                }
            } else {
                var.value.clone()
            };
            sealed.push((var.key.clone(), value, var.secret));
        }

        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM override_env WHERE instance_pk = ?")
            .bind(instance_pk)
            .execute(&mut *tx)
            .await?;
        for (key, value, secret) in &sealed {
            sqlx::query(
                "INSERT INTO override_env (instance_pk, key, value, secret) VALUES (?, ?, ?, ?)",
            )
            .bind(instance_pk)
            .bind(key)
            .bind(value)
            .bind(*secret as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        self.touch_instance(instance_pk).await
    }

    pub async fn replace_labels(
        &self,
        instance_pk: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM override_labels WHERE instance_pk = ?")
            .bind(instance_pk)
            .execute(&mut *tx)
            .await?;
        for (key, value) in labels {
            sqlx::query("INSERT INTO override_labels (instance_pk, key, value) VALUES (?, ?, ?)")
                .bind(instance_pk)
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        self.touch_instance(instance_pk).await
    }

    pub async fn replace_domains(&self, instance_pk: &str, domains: &[DomainSpec]) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM override_domains WHERE instance_pk = ?")
            .bind(instance_pk)
            .execute(&mut *tx)
            .await?;
        for (position, domain) in domains.iter().enumerate() {
            sqlx::query(
                "INSERT INTO override_domains (instance_pk, position, host, port) VALUES (?, ?, ?, ?)",
            )
            .bind(instance_pk)
            .bind(position as i64)
            .bind(&domain.host)
            .bind(domain.port as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        self.touch_instance(instance_pk).await
    }

    pub async fn replace_healthcheck(
        &self,
        instance_pk: &str,
        healthcheck: Option<&HealthcheckSpec>,
    ) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM override_healthcheck WHERE instance_pk = ?")
            .bind(instance_pk)
            .execute(&mut *tx)
            .await?;
        if let Some(hc) = healthcheck {
            sqlx::query(
                "INSERT INTO override_healthcheck \
                 (instance_pk, test, interval_secs, timeout_secs, retries, start_period_secs) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(instance_pk)
            .bind(serde_json::to_string(&hc.test)?)
            .bind(hc.interval_secs as i64)
            .bind(hc.timeout_secs as i64)
            .bind(hc.retries as i64)
            .bind(hc.start_period_secs as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        self.touch_instance(instance_pk).await
    }

    pub async fn replace_deps(&self, instance_pk: &str, deps: &[String]) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM override_deps WHERE instance_pk = ?")
            .bind(instance_pk)
            .execute(&mut *tx)
            .await?;
        for (position, dep) in deps.iter().enumerate() {
            sqlx::query(
                "INSERT INTO override_deps (instance_pk, position, depends_on) VALUES (?, ?, ?)",
            )
            .bind(instance_pk)
            .bind(position as i64)
            .bind(dep)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        self.touch_instance(instance_pk).await
    }

    pub async fn replace_config_files(
        &self,
        instance_pk: &str,
        files: &[ConfigFileSpec],
    ) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM override_config_files WHERE instance_pk = ?")
            .bind(instance_pk)
            .execute(&mut *tx)
            .await?;
        for file in files {
            sqlx::query(
                "INSERT INTO override_config_files (instance_pk, path, content, mode) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(instance_pk)
            .bind(&file.path)
            .bind(&file.content)
            .bind(file.mode.map(|m| m as i64))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        self.touch_instance(instance_pk).await
    }

    async fn touch_instance(&self, instance_pk: &str) -> Result<()> {
        sqlx::query("UPDATE instances SET updated_at = ? WHERE id = ?")
            .bind(now_rfc3339())
            .bind(instance_pk)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
