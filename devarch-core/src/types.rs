use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::validation;

/// A published port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    /// Host port; None lets the engine pick an ephemeral one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<u16>,
    pub container: u16,
    #[serde(default)]
    pub protocol: Protocol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

/// A bind mount or named volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    /// Host path (bind) or volume name (named).
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub kind: VolumeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeKind {
    #[default]
    Bind,
    Named,
}

/// One environment entry. An empty value acts as a tombstone: the key is
/// removed from the effective environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub secret: bool,
}

/// A local domain routed to a container port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainSpec {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthcheckSpec {
    pub test: Vec<String>,
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default)]
    pub start_period_secs: u64,
}

fn default_interval() -> u64 {
    30
}
fn default_timeout() -> u64 {
    5
}
fn default_retries() -> u32 {
    3
}

impl HealthcheckSpec {
    /// Upper bound on how long a dependent waits for this check to pass.
    pub fn wait_budget_secs(&self) -> u64 {
        self.start_period_secs + (self.interval_secs + self.timeout_secs) * self.retries as u64
    }
}

/// A config file materialized next to the stack and mounted into the
/// container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFileSpec {
    /// Path relative to the instance materialization directory.
    pub path: String,
    pub content: String,
    /// File mode; 0644 when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,
}

/// Immutable service blueprint in the catalog. Referenced, never owned, by
/// instances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub version: i64,
    pub image: String,
    pub restart_policy: Option<String>,
    pub command: Option<Vec<String>>,
    pub user: Option<String>,
    pub ports: Vec<PortSpec>,
    pub volumes: Vec<VolumeSpec>,
    pub env: Vec<EnvVar>,
    pub labels: BTreeMap<String, String>,
    pub domains: Vec<DomainSpec>,
    pub healthcheck: Option<HealthcheckSpec>,
    pub config_files: Vec<ConfigFileSpec>,
    pub depends_on: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Isolation boundary: owns its instances, network, materialization
/// directory, and lockfile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stack {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Explicit network override; derived `devarch-{stack}-net` when None.
    pub network_name: Option<String>,
    pub enabled: bool,
    pub last_applied_checksum: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Stack {
    pub fn network(&self) -> String {
        self.network_name
            .clone()
            .unwrap_or_else(|| validation::network_name(&self.name))
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// One deployment of a template inside a stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    /// Row id.
    pub id: String,
    pub stack_id: String,
    /// DNS-safe id, unique within the stack.
    pub instance_id: String,
    pub template_id: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Per-instance replacements for the template's scalar fields. Each value
/// replaces its template counterpart when present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalarOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl ScalarOverrides {
    pub fn is_empty(&self) -> bool {
        self.image.is_none()
            && self.restart_policy.is_none()
            && self.command.is_none()
            && self.user.is_none()
    }
}

/// Copy-on-write deltas for one instance.
///
/// `None` on a full-replacement set means "inherit the template"; `Some`
/// replaces it wholesale. Key-merged sets (env, labels, config files) merge
/// entry by entry and are simply empty when untouched. Scalars replace the
/// template value field by field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OverrideSet {
    pub scalars: ScalarOverrides,
    pub ports: Option<Vec<PortSpec>>,
    pub volumes: Option<Vec<VolumeSpec>>,
    pub env: Vec<EnvVar>,
    pub labels: BTreeMap<String, String>,
    pub domains: Option<Vec<DomainSpec>>,
    pub healthcheck: Option<HealthcheckSpec>,
    pub depends_on: Vec<String>,
    pub config_files: Vec<ConfigFileSpec>,
}

impl OverrideSet {
    pub fn is_empty(&self) -> bool {
        self.scalars.is_empty()
            && self.ports.is_none()
            && self.volumes.is_none()
            && self.env.is_empty()
            && self.labels.is_empty()
            && self.domains.is_none()
            && self.healthcheck.is_none()
            && self.depends_on.is_empty()
            && self.config_files.is_empty()
    }
}

/// Merged result of a template and an instance's overrides, with identity
/// labels injected. Maps are ordered so serialization is canonical.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub stack_name: String,
    pub instance_id: String,
    pub container_name: String,
    pub template_name: String,
    pub template_version: i64,
    pub enabled: bool,
    pub image: String,
    pub restart_policy: Option<String>,
    pub command: Option<Vec<String>>,
    pub user: Option<String>,
    pub ports: Vec<PortSpec>,
    pub volumes: Vec<VolumeSpec>,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub domains: Vec<DomainSpec>,
    pub healthcheck: Option<HealthcheckSpec>,
    pub config_files: Vec<ConfigFileSpec>,
    pub depends_on: Vec<String>,
}

/// Advisory lock row for one stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    pub stack_id: String,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

impl LockRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.deadline < now
    }
}

/// Post-apply snapshot for one instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockfileEntry {
    pub stack_id: String,
    pub instance_id: String,
    pub host_ports: Vec<u16>,
    pub image_digest: Option<String>,
    pub template_version: i64,
    /// Hash of the effective config at apply time; drives modify detection.
    pub config_hash: String,
    /// Canonical JSON snapshot of the effective config at apply time.
    pub config_snapshot: String,
    pub recorded_at: DateTime<Utc>,
}

/// Non-fatal finding surfaced by the generator or planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticKind {
    StrippedDependency,
    PortCollision,
    DisabledInstance,
    LockfileDrift,
    UnmanagedContainer,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            instance_id: None,
        }
    }

    pub fn for_instance(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }
}
