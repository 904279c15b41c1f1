use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::secrets;
use crate::store::Store;
use crate::types::{
    ConfigFileSpec, DomainSpec, EnvVar, HealthcheckSpec, OverrideSet, PortSpec, VolumeSpec,
};

pub const MANIFEST_VERSION: u32 = 1;

/// Declarative stack manifest (`devarch.yml`). Secrets never appear in
/// plaintext; they export as `${secret:<key>}` placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub stack: ManifestStack,
    pub instances: BTreeMap<String, ManifestInstance>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestStack {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestInstance {
    pub template: String,
    pub template_version: i64,
    pub enabled: bool,
    pub overrides: ManifestOverrides,
}

/// Override sets in manifest shape. Absent keys mean "inherit the
/// template"; the field names mirror the data model.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ManifestOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<PortSpec>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<VolumeSpec>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domains: Option<Vec<DomainSpec>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<HealthcheckSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_files: Option<Vec<ConfigFileSpec>>,
}

impl ManifestOverrides {
    /// Manifest shape for a stored override set, with secret values
    /// redacted to placeholders.
    pub fn from_override_set(overrides: &OverrideSet) -> Self {
        let env = if overrides.env.is_empty() {
            None
        } else {
            Some(
                overrides
                    .env
                    .iter()
                    .map(|var| {
                        let value = if var.secret {
                            secrets::placeholder(&var.key)
                        } else {
                            var.value.clone()
                        };
                        (var.key.clone(), value)
                    })
                    .collect(),
            )
        };

        Self {
            image: overrides.scalars.image.clone(),
            restart_policy: overrides.scalars.restart_policy.clone(),
            command: overrides.scalars.command.clone(),
            user: overrides.scalars.user.clone(),
            ports: overrides.ports.clone(),
            volumes: overrides.volumes.clone(),
            env,
            labels: if overrides.labels.is_empty() {
                None
            } else {
                Some(overrides.labels.clone())
            },
            domains: overrides.domains.clone(),
            healthcheck: overrides.healthcheck.clone(),
            depends_on: if overrides.depends_on.is_empty() {
                None
            } else {
                Some(overrides.depends_on.clone())
            },
            config_files: if overrides.config_files.is_empty() {
                None
            } else {
                Some(overrides.config_files.clone())
            },
        }
    }

    /// Back to the stored shape. A `${secret:<key>}` value marks the entry
    /// secret; `existing_secret` supplies the stored plaintext when the
    /// instance already had one.
    pub fn to_override_set(
        &self,
        existing_secret: impl Fn(&str) -> Option<String>,
    ) -> OverrideSet {
        let env = self
            .env
            .as_ref()
            .map(|map| {
                map.iter()
                    .map(|(key, value)| match secrets::parse_placeholder(value) {
                        Some(_) => EnvVar {
                            key: key.clone(),
                            value: existing_secret(key).unwrap_or_default(),
                            secret: true,
                        },
                        None => EnvVar {
                            key: key.clone(),
                            value: value.clone(),
                            secret: false,
                        },
                    })
                    .collect()
            })
            .unwrap_or_default();

        OverrideSet {
            scalars: crate::types::ScalarOverrides {
                image: self.image.clone(),
                restart_policy: self.restart_policy.clone(),
                command: self.command.clone(),
                user: self.user.clone(),
            },
            ports: self.ports.clone(),
            volumes: self.volumes.clone(),
            env,
            labels: self.labels.clone().unwrap_or_default(),
            domains: self.domains.clone(),
            healthcheck: self.healthcheck.clone(),
            depends_on: self.depends_on.clone().unwrap_or_default(),
            config_files: self.config_files.clone().unwrap_or_default(),
        }
    }
}

impl Manifest {
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let manifest: Manifest = serde_yaml::from_str(yaml)?;
        if manifest.version != MANIFEST_VERSION {
            return Err(crate::error::Error::validation(format!(
                "unsupported manifest version {} (expected {})",
                manifest.version, MANIFEST_VERSION
            ))
            .with_field("version"));
        }
        Ok(manifest)
    }
}

/// Export a stack as a manifest. Instances come out ordered by id, override
/// sets in stored shape, secrets redacted.
pub async fn export_manifest(store: &Store, stack_name: &str) -> Result<Manifest> {
    let stack = store.require_stack(stack_name).await?;
    let instances = store.list_instances(&stack.id).await?;

    let mut manifest_instances = BTreeMap::new();
    for instance in &instances {
        let template = store
            .get_template(&instance.template_id)
            .await?
            .ok_or_else(|| {
                crate::error::Error::internal(format!(
                    "instance '{}' references missing template",
                    instance.instance_id
                ))
            })?;
        let overrides = store.get_overrides(&instance.id).await?;
        manifest_instances.insert(
            instance.instance_id.clone(),
            ManifestInstance {
                template: template.name.clone(),
                template_version: template.version,
                enabled: instance.enabled,
                overrides: ManifestOverrides::from_override_set(&overrides),
            },
        );
    }

    Ok(Manifest {
        version: MANIFEST_VERSION,
        stack: ManifestStack {
            name: stack.name.clone(),
            description: stack.description.clone(),
            network: stack.network_name.clone(),
            enabled: stack.enabled,
        },
        instances: manifest_instances,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_round_trip_is_byte_identical() {
        let mut instances = BTreeMap::new();
        let mut env = BTreeMap::new();
        env.insert("APP_ENV".to_string(), "local".to_string());
        env.insert("DB_PASSWORD".to_string(), "${secret:DB_PASSWORD}".to_string());
        instances.insert(
            "web".to_string(),
            ManifestInstance {
                template: "php".to_string(),
                template_version: 3,
                enabled: true,
                overrides: ManifestOverrides {
                    env: Some(env),
                    ..Default::default()
                },
            },
        );
        let manifest = Manifest {
            version: 1,
            stack: ManifestStack {
                name: "s".to_string(),
                description: "demo".to_string(),
                network: None,
                enabled: true,
            },
            instances,
        };

        let yaml1 = manifest.to_yaml().unwrap();
        let parsed = Manifest::from_yaml(&yaml1).unwrap();
        let yaml2 = parsed.to_yaml().unwrap();
        assert_eq!(yaml1, yaml2);
        assert_eq!(manifest, parsed);
    }

    #[test]
    fn secrets_are_redacted_on_export_shape() {
        let overrides = OverrideSet {
            env: vec![
                EnvVar {
                    key: "PLAIN".to_string(),
                    value: "visible".to_string(),
                    secret: false,
                },
                EnvVar {
                    key: "TOKEN".to_string(),
                    value: "super-secret".to_string(),
                    secret: true,
                },
            ],
            ..Default::default()
        };
        let shaped = ManifestOverrides::from_override_set(&overrides);
        let env = shaped.env.unwrap();
        assert_eq!(env.get("PLAIN").map(String::as_str), Some("visible"));
        assert_eq!(env.get("TOKEN").map(String::as_str), Some("${secret:TOKEN}"));
    }

    #[test]
    fn placeholder_import_recovers_existing_secret() {
        let mut env = BTreeMap::new();
        env.insert("TOKEN".to_string(), "${secret:TOKEN}".to_string());
        let shaped = ManifestOverrides {
            env: Some(env),
            ..Default::default()
        };
        let set = shaped.to_override_set(|key| {
            (key == "TOKEN").then(|| "stored-value".to_string())
        });
        assert_eq!(set.env.len(), 1);
        assert!(set.env[0].secret);
        assert_eq!(set.env[0].value, "stored-value");
    }

    #[test]
    fn unknown_version_is_rejected() {
        let yaml = "version: 9\nstack:\n  name: s\n  description: ''\n  enabled: true\ninstances: {}\n";
        let err = Manifest::from_yaml(yaml).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Validation);
    }
}
