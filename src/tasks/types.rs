use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::runtime::RuntimeError;
use crate::site::types::SiteId;

/// Per-task provisioning state. `Success` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    Received,
    Building,
    Submitted,
    NetworkAttaching,
    Starting,
    Success,
    Error,
}

/// Image name plus version. An empty version means `latest`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ImageRef {
    pub name: String,
    pub version: String,
}

impl ImageRef {
    /// Splits `name[:version]` or `name@digest`. A colon that belongs to a
    /// registry host (`registry:5000/app`) is not taken as the version.
    pub fn parse(reference: &str) -> Self {
        let reference = reference.trim();

        if let Some((name, digest)) = reference.split_once('@') {
            return ImageRef {
                name: name.to_string(),
                version: digest.to_string(),
            };
        }

        match reference.rsplit_once(':') {
            Some((name, version)) if !version.contains('/') => ImageRef {
                name: name.to_string(),
                version: version.to_string(),
            },
            _ => ImageRef {
                name: reference.to_string(),
                version: String::new(),
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }

    pub fn version(&self) -> &str {
        if self.version.is_empty() {
            "latest"
        } else {
            &self.version
        }
    }

    /// Reference string as the runtime expects it.
    pub fn reference(&self) -> String {
        let version = self.version();
        if version.contains(':') {
            format!("{}@{}", self.name, version)
        } else {
            format!("{}:{}", self.name, version)
        }
    }
}

impl From<String> for ImageRef {
    fn from(value: String) -> Self {
        ImageRef::parse(&value)
    }
}

impl From<ImageRef> for String {
    fn from(value: ImageRef) -> Self {
        if value.is_empty() {
            String::new()
        } else {
            value.reference()
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reference())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum PortProtocol {
    #[default]
    Tcp,
    Udp,
}

impl fmt::Display for PortProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortProtocol::Tcp => write!(f, "tcp"),
            PortProtocol::Udp => write!(f, "udp"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    pub host: u16,
    pub dest: u16,
    #[serde(default)]
    pub protocol: PortProtocol,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EnvVar {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// Bind mount permission. Anything that is not a read-only spelling is
/// read-write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Permission {
    #[default]
    ReadWrite,
    ReadOnly,
}

impl Permission {
    pub fn normalize(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "readonly" | "read-only" | "ro" => Permission::ReadOnly,
            _ => Permission::ReadWrite,
        }
    }

    /// Mode suffix used in `host:dest:mode` bind strings.
    pub fn mode(&self) -> &'static str {
        match self {
            Permission::ReadWrite => "rw",
            Permission::ReadOnly => "ro",
        }
    }
}

impl From<String> for Permission {
    fn from(value: String) -> Self {
        Permission::normalize(&value)
    }
}

impl From<Permission> for String {
    fn from(value: Permission) -> Self {
        match value {
            Permission::ReadWrite => "readwrite".to_string(),
            Permission::ReadOnly => "readonly".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Volume {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub dest: String,
    #[serde(default)]
    pub permission: Permission,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DefaultVolume {
    #[serde(default)]
    pub dest: String,
}

/// Reference to another workload. An empty alias means the target name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Link {
    pub name: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub volume: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    #[default]
    No,
    Always,
    UnlessStopped,
    OnFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceLimit {
    CpuShares,
    Memory,
    ShmSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    #[default]
    Bridge,
    Host,
}

impl NetworkMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkMode::Bridge => "bridge",
            NetworkMode::Host => "host",
        }
    }
}

/// Declarative description of everything needed to create and start the
/// container behind a site.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunParams {
    pub image: ImageRef,
    pub pull_image: bool,
    pub ports: Vec<PortBinding>,
    pub environment: Vec<EnvVar>,
    pub volumes: Vec<Volume>,
    pub volumes_default: Vec<DefaultVolume>,
    pub links: Vec<Link>,
    pub networks: Vec<NetworkConfig>,
    /// Zero leaves the runtime default in place.
    pub cpu_shares: i64,
    pub memory: i64,
    pub shm_size: i64,
    pub work_dir: String,
    pub user: String,
    pub command: String,
    pub entrypoint: String,
    pub privileged: bool,
    pub restart: RestartPolicy,
    pub use_host_network: bool,
    pub bind_ipv6: bool,
}

/// One queued provisioning request. Owns its `RunParams`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateMessage {
    pub task_id: uuid::Uuid,
    pub name: String,
    pub site_id: SiteId,
    pub run_params: RunParams,
}

impl CreateMessage {
    pub fn new(name: impl Into<String>, site_id: SiteId, run_params: RunParams) -> Self {
        CreateMessage {
            task_id: uuid::Uuid::new_v4(),
            name: name.into(),
            site_id,
            run_params,
        }
    }
}

/// Which step of a provisioning attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    RuntimeSubmit,
    NetworkAttach,
    Start,
}

/// Task-time failures. The display text is the runtime's own message so the
/// persisted site message reads the same whichever step failed.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    #[error(transparent)]
    RuntimeSubmit(RuntimeError),

    #[error("{source}")]
    NetworkAttach {
        network: String,
        container: String,
        source: RuntimeError,
    },

    #[error(transparent)]
    Start(RuntimeError),
}

impl TaskError {
    pub fn kind(&self) -> FailureKind {
        match self {
            TaskError::RuntimeSubmit(_) => FailureKind::RuntimeSubmit,
            TaskError::NetworkAttach { .. } => FailureKind::NetworkAttach,
            TaskError::Start(_) => FailureKind::Start,
        }
    }
}

pub type TaskResult<T> = Result<T, TaskError>;
