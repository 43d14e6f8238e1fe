//! Redis Custom Resource Definition.
//!
//! Describes a master/replica Redis topology. Every resource the operator
//! manages for a `Redis` is derived from this object and its identity.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Redis is the desired state of one master/replica deployment.
///
/// Example:
/// ```yaml
/// apiVersion: cache.assignment.yazio.com/v1alpha1
/// kind: Redis
/// metadata:
///   name: cache1
/// spec:
///   common:
///     image:
///       imageRegistry: bitnami/redis
///       imageTag: 7.2.5
///     auth:
///       existingSecret: ext-creds
///   master:
///     count: 1
///   replica:
///     count: 2
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "cache.assignment.yazio.com",
    version = "v1alpha1",
    kind = "Redis",
    plural = "redis",
    status = "RedisStatus",
    namespaced,
    printcolumn = r#"{"name":"Master", "type":"integer", "jsonPath":".spec.master.count"}"#,
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replica.count"}"#,
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RedisSpec {
    /// Values shared by master and replicas.
    #[serde(default)]
    pub common: CommonSpec,

    /// Master parameters.
    #[serde(default)]
    pub master: MasterSpec,

    /// Replica parameters.
    #[serde(default)]
    pub replica: ReplicaSpec,
}

/// Values shared by every Redis pod of one instance.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommonSpec {
    /// Container image parameters.
    #[serde(default)]
    pub image: ImageSpec,

    /// Storage class for Redis volumes (default: standard).
    #[serde(default = "default_storage_class")]
    pub storage_class: String,

    /// Authentication configuration.
    #[serde(default)]
    pub auth: AuthSpec,
}

impl Default for CommonSpec {
    fn default() -> Self {
        Self {
            image: ImageSpec::default(),
            storage_class: default_storage_class(),
            auth: AuthSpec::default(),
        }
    }
}

fn default_storage_class() -> String {
    "standard".to_string()
}

/// Container image reference.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
pub struct ImageSpec {
    /// Image repository (default: bitnami/redis).
    #[serde(rename = "imageRegistry", default = "default_image_repository")]
    pub repository: String,

    /// Image tag (default: 7.2.5).
    #[serde(rename = "imageTag", default = "default_image_tag")]
    pub tag: String,

    /// Image pull secrets.
    #[serde(rename = "imagePullSecrets", default)]
    pub pull_secrets: Vec<PullSecretRef>,

    /// Image pull policy (default: IfNotPresent).
    #[serde(rename = "imagePullPolicy", default = "default_image_pull_policy")]
    pub pull_policy: String,
}

impl Default for ImageSpec {
    fn default() -> Self {
        Self {
            repository: default_image_repository(),
            tag: default_image_tag(),
            pull_secrets: Vec::new(),
            pull_policy: default_image_pull_policy(),
        }
    }
}

impl ImageSpec {
    /// Full image reference, `repository:tag`.
    pub fn reference(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }
}

fn default_image_repository() -> String {
    "bitnami/redis".to_string()
}

fn default_image_tag() -> String {
    "7.2.5".to_string()
}

fn default_image_pull_policy() -> String {
    "IfNotPresent".to_string()
}

/// Name of a Secret used to pull the image.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct PullSecretRef {
    pub name: String,
}

/// Authentication configuration.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthSpec {
    /// Enable password authentication (default: true).
    #[serde(default = "default_auth_enabled")]
    pub enabled: bool,

    /// Name of an existing Secret with Redis credentials.
    /// Must contain a `REDIS_PASSWORD` key. When empty, the operator
    /// generates `<name>-auth-secret` once and never rotates it.
    #[serde(default)]
    pub existing_secret: String,
}

impl Default for AuthSpec {
    fn default() -> Self {
        Self {
            enabled: default_auth_enabled(),
            existing_secret: String::new(),
        }
    }
}

impl AuthSpec {
    /// The externally managed credential secret, if one is configured.
    pub fn existing_secret(&self) -> Option<&str> {
        Some(self.existing_secret.as_str()).filter(|s| !s.is_empty())
    }
}

fn default_auth_enabled() -> bool {
    true
}

/// Master parameters.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MasterSpec {
    /// Number of master pods (default: 1).
    #[serde(default = "default_master_count")]
    pub count: i32,

    /// Workload kind (default: deployment).
    #[serde(default)]
    pub kind: WorkloadKind,
}

impl Default for MasterSpec {
    fn default() -> Self {
        Self {
            count: default_master_count(),
            kind: WorkloadKind::default(),
        }
    }
}

fn default_master_count() -> i32 {
    1
}

/// Replica parameters.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSpec {
    /// Number of replica pods (default: 0).
    #[serde(default)]
    pub count: i32,

    /// Workload kind (default: deployment).
    #[serde(default)]
    pub kind: WorkloadKind,
}

/// Workload kind used to run the pods of a role.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadKind {
    #[default]
    Deployment,
}

/// Status of a Redis.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisStatus {
    /// Observed conditions, upserted by type.
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Generation of the spec last reconciled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Condition describes the state of a Redis at a certain point.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition.
    pub r#type: String,
    /// Status of the condition ("True", "False", "Unknown").
    pub status: String,
    /// Machine-readable reason for the condition's last transition.
    pub reason: String,
    /// Human-readable message indicating details about last transition.
    pub message: String,
    /// Last time the condition transitioned from one status to another.
    pub last_transition_time: String,
    /// The generation of the resource this condition was observed for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Create a new condition.
    pub fn new(
        condition_type: &str,
        status: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self {
            r#type: condition_type.to_string(),
            status: if status {
                "True".to_string()
            } else {
                "False".to_string()
            },
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: jiff::Timestamp::now().to_string(),
            observed_generation: generation,
        }
    }

    /// Create a "Ready" condition.
    pub fn ready(ready: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new("Ready", ready, reason, message, generation)
    }

    /// Whether two conditions describe the same state, ignoring timestamps.
    pub fn same_state(&self, other: &Condition) -> bool {
        self.r#type == other.r#type
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
            && self.observed_generation == other.observed_generation
    }
}
