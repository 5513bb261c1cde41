//! Provisioning requests, the spec builder, and the runtime client seam.

pub mod builder;
pub mod docker;
pub mod runtime;
pub mod state;
pub mod types;

pub use builder::{ContainerSpec, ContainerSpecBuilder};
pub use docker::DockerClient;
pub use runtime::{ContainerRuntime, RuntimeError};
pub use types::{CreateMessage, FailureKind, RunParams, State, TaskError};
