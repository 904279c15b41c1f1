use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::Store;

pub const LOCKFILE_VERSION: u32 = 1;

/// Resolved snapshot (`devarch.lock`): per instance the chosen host ports,
/// observed image digest, and template version. Deterministic — two exports
/// from the same state are byte-identical, so `exported_at` derives from the
/// stored records, never from the wall clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockfileDoc {
    pub version: u32,
    pub stack: String,
    pub exported_at: String,
    pub instances: BTreeMap<String, LockfileInstance>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockfileInstance {
    pub host_ports: Vec<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_digest: Option<String>,
    pub template_version: i64,
}

impl LockfileDoc {
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let doc: LockfileDoc = serde_yaml::from_str(yaml)?;
        if doc.version != LOCKFILE_VERSION {
            return Err(crate::error::Error::validation(format!(
                "unsupported lockfile version {} (expected {})",
                doc.version, LOCKFILE_VERSION
            ))
            .with_field("version"));
        }
        Ok(doc)
    }
}

/// Export the current lockfile of a stack.
pub async fn export_lockfile(store: &Store, stack_name: &str) -> Result<LockfileDoc> {
    let stack = store.require_stack(stack_name).await?;
    let entries = store.get_lockfile(&stack.id).await?;

    // Derived from the stored records so equal state exports byte-identical
    // files; a never-applied stack pins the epoch.
    let exported_at = entries
        .iter()
        .map(|e| e.recorded_at)
        .max()
        .unwrap_or(DateTime::UNIX_EPOCH);

    let instances = entries
        .into_iter()
        .map(|entry| {
            (
                entry.instance_id,
                LockfileInstance {
                    host_ports: entry.host_ports,
                    image_digest: entry.image_digest,
                    template_version: entry.template_version,
                },
            )
        })
        .collect();

    Ok(LockfileDoc {
        version: LOCKFILE_VERSION,
        stack: stack.name.clone(),
        exported_at: format_ts(exported_at),
        instances,
    })
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}
