//! Runtime client seam.
//!
//! The provisioning engine only talks to the container runtime through
//! [`ContainerRuntime`]. Every method is a single pass-through call; failures
//! come back verbatim as [`RuntimeError`] and are never retried here.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use thiserror::Error;

use super::types::RestartPolicy;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors reported by the container runtime. The display text is the
/// daemon's message with nothing prepended.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{message}")]
    Daemon { status: u16, message: String },

    #[error("runtime call `{operation}` timed out after {seconds}s")]
    Timeout {
        operation: &'static str,
        seconds: u64,
    },

    #[error("{0}")]
    Connection(String),
}

/// Runtime-neutral container creation request produced by the spec builder.
/// Ordered collections keep two builds of the same params identical.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerCreateRequest {
    pub name: String,
    pub image: String,
    pub env: Vec<String>,
    pub cmd: Option<Vec<String>>,
    pub entrypoint: Option<Vec<String>>,
    pub working_dir: Option<String>,
    pub user: Option<String>,
    /// `"<port>/<proto>"` -> host port.
    pub port_bindings: BTreeMap<String, u16>,
    /// `host:dest:mode` bind strings.
    pub binds: Vec<String>,
    pub anonymous_volumes: BTreeSet<String>,
    pub volumes_from: Vec<String>,
    pub privileged: bool,
    pub restart: RestartPolicy,
    pub cpu_shares: Option<i64>,
    pub memory: Option<i64>,
    pub shm_size: Option<i64>,
    pub network_mode: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StopOptions {
    /// Seconds to wait before killing. `None` uses the runtime default.
    pub timeout_secs: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemoveOptions {
    pub remove_volumes: bool,
    pub remove_links: bool,
    pub force: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageRemoveOptions {
    pub force: bool,
    pub no_prune: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetworkCreateOptions {
    pub ipv6: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerSummary {
    pub id: String,
    pub names: Vec<String>,
    pub image: String,
    pub state: Option<String>,
    pub public_ports: Vec<u16>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn ping(&self) -> RuntimeResult<()>;

    /// Pulls `reference`, draining the progress stream.
    async fn image_pull(&self, reference: &str) -> RuntimeResult<()>;

    async fn container_create(&self, request: &ContainerCreateRequest) -> RuntimeResult<String>;

    async fn container_start(&self, id: &str) -> RuntimeResult<()>;

    async fn container_stop(&self, id: &str, options: StopOptions) -> RuntimeResult<()>;

    async fn container_remove(&self, id: &str, options: RemoveOptions) -> RuntimeResult<()>;

    async fn image_remove(&self, image: &str, options: ImageRemoveOptions) -> RuntimeResult<()>;

    /// Connects `container` to `network`. The runtime takes the alias list
    /// as-is; callers attach one alias per call.
    async fn network_connect(
        &self,
        network: &str,
        container: &str,
        aliases: &[String],
    ) -> RuntimeResult<()>;

    async fn network_create(&self, name: &str, options: NetworkCreateOptions) -> RuntimeResult<()>;

    /// Lists containers (running or not) matching a runtime filter such as
    /// `publish`.
    async fn container_query_by_field(
        &self,
        field: &str,
        values: &[String],
    ) -> RuntimeResult<Vec<ContainerSummary>>;
}
