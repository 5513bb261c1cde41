use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bollard::{
    API_DEFAULT_VERSION, Docker,
    container::{
        Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
        StartContainerOptions, StopContainerOptions,
    },
    errors::Error as BollardError,
    image::{CreateImageOptions, RemoveImageOptions},
    models::{EndpointSettings, HostConfig, PortBinding, RestartPolicyNameEnum},
    network::{ConnectNetworkOptions, CreateNetworkOptions},
};
use futures_util::stream::StreamExt;
use tracing::{debug, info};

use super::runtime::{
    ContainerCreateRequest, ContainerRuntime, ContainerSummary, ImageRemoveOptions,
    NetworkCreateOptions, RemoveOptions, RuntimeError, RuntimeResult, StopOptions,
};
use super::types::RestartPolicy;
use crate::config::DockerConfig;

const DEFAULT_SOCKET_PATH: &str = "/var/run/docker.sock";

/// Docker Engine implementation of [`ContainerRuntime`]. Every call is bounded
/// by the configured timeout.
#[derive(Debug, Clone)]
pub struct DockerClient {
    client: Docker,
    call_timeout: Duration,
    pull_timeout: Duration,
}

impl From<BollardError> for RuntimeError {
    fn from(err: BollardError) -> Self {
        match err {
            BollardError::DockerResponseServerError {
                status_code,
                message,
            } => match status_code {
                404 => RuntimeError::NotFound(message),
                409 => RuntimeError::Conflict(message),
                403 if message.contains("already exists") => RuntimeError::Conflict(message),
                status => RuntimeError::Daemon { status, message },
            },
            other => RuntimeError::Connection(other.to_string()),
        }
    }
}

impl DockerClient {
    pub fn connect(config: &DockerConfig) -> RuntimeResult<Self> {
        let socket_path = config.socket_path.trim_start_matches("unix://");
        let client = if socket_path.is_empty() || socket_path == DEFAULT_SOCKET_PATH {
            Docker::connect_with_unix_defaults()?
        } else {
            Docker::connect_with_unix(socket_path, config.call_timeout_secs, API_DEFAULT_VERSION)?
        };

        info!(socket = %config.socket_path, "Docker client configured");

        Ok(DockerClient {
            client,
            call_timeout: Duration::from_secs(config.call_timeout_secs),
            pull_timeout: Duration::from_secs(config.pull_timeout_secs),
        })
    }

    async fn call<T, F>(&self, operation: &'static str, future: F) -> RuntimeResult<T>
    where
        F: Future<Output = Result<T, BollardError>>,
    {
        bounded(operation, self.call_timeout, future).await
    }
}

async fn bounded<T, F>(operation: &'static str, limit: Duration, future: F) -> RuntimeResult<T>
where
    F: Future<Output = Result<T, BollardError>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result.map_err(RuntimeError::from),
        Err(_) => Err(RuntimeError::Timeout {
            operation,
            seconds: limit.as_secs(),
        }),
    }
}

fn restart_policy_name(policy: RestartPolicy) -> RestartPolicyNameEnum {
    match policy {
        RestartPolicy::No => RestartPolicyNameEnum::NO,
        RestartPolicy::Always => RestartPolicyNameEnum::ALWAYS,
        RestartPolicy::UnlessStopped => RestartPolicyNameEnum::UNLESS_STOPPED,
        RestartPolicy::OnFailure => RestartPolicyNameEnum::ON_FAILURE,
    }
}

fn non_empty(values: &[String]) -> Option<Vec<String>> {
    if values.is_empty() {
        None
    } else {
        Some(values.to_vec())
    }
}

/// Translates the neutral request into the Docker create body.
pub(crate) fn container_config(request: &ContainerCreateRequest) -> Config<String> {
    let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = request
        .port_bindings
        .iter()
        .map(|(port, host)| {
            (
                port.clone(),
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: Some(host.to_string()),
                }]),
            )
        })
        .collect();

    let exposed_ports: HashMap<String, HashMap<(), ()>> = request
        .port_bindings
        .keys()
        .map(|port| (port.clone(), HashMap::new()))
        .collect();

    let volumes: HashMap<String, HashMap<(), ()>> = request
        .anonymous_volumes
        .iter()
        .map(|dest| (dest.clone(), HashMap::new()))
        .collect();

    let host_config = HostConfig {
        binds: non_empty(&request.binds),
        port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
        volumes_from: non_empty(&request.volumes_from),
        privileged: Some(request.privileged),
        restart_policy: Some(bollard::models::RestartPolicy {
            name: Some(restart_policy_name(request.restart)),
            maximum_retry_count: None,
        }),
        cpu_shares: request.cpu_shares,
        memory: request.memory,
        shm_size: request.shm_size,
        network_mode: request.network_mode.clone(),
        ..Default::default()
    };

    Config {
        image: Some(request.image.clone()),
        env: non_empty(&request.env),
        cmd: request.cmd.clone(),
        entrypoint: request.entrypoint.clone(),
        working_dir: request.working_dir.clone(),
        user: request.user.clone(),
        exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
        volumes: (!volumes.is_empty()).then_some(volumes),
        host_config: Some(host_config),
        ..Default::default()
    }
}

#[async_trait]
impl ContainerRuntime for DockerClient {
    async fn ping(&self) -> RuntimeResult<()> {
        let reply = self.call("ping", self.client.ping()).await?;
        debug!(reply = %reply, "Docker daemon reachable");
        Ok(())
    }

    async fn image_pull(&self, reference: &str) -> RuntimeResult<()> {
        info!(image = %reference, "Pulling image");

        let pull = async {
            let mut stream = std::pin::pin!(self.client.create_image(
                Some(CreateImageOptions {
                    from_image: reference.to_string(),
                    ..Default::default()
                }),
                None,
                None,
            ));

            while let Some(msg) = stream.next().await {
                let info = msg?;
                if let Some(status) = info.status {
                    debug!(image = %reference, status = %status, "pull progress");
                }
            }
            Ok::<(), BollardError>(())
        };

        bounded("image_pull", self.pull_timeout, pull).await?;
        info!(image = %reference, "Image pulled");
        Ok(())
    }

    async fn container_create(&self, request: &ContainerCreateRequest) -> RuntimeResult<String> {
        let options = Some(CreateContainerOptions {
            name: request.name.clone(),
            ..Default::default()
        });

        let response = self
            .call(
                "container_create",
                self.client
                    .create_container(options, container_config(request)),
            )
            .await?;

        for warning in &response.warnings {
            debug!(container = %response.id, warning = %warning, "create warning");
        }
        Ok(response.id)
    }

    async fn container_start(&self, id: &str) -> RuntimeResult<()> {
        self.call(
            "container_start",
            self.client
                .start_container(id, None::<StartContainerOptions<String>>),
        )
        .await
    }

    async fn container_stop(&self, id: &str, options: StopOptions) -> RuntimeResult<()> {
        let options = options.timeout_secs.map(|t| StopContainerOptions { t });
        self.call("container_stop", self.client.stop_container(id, options))
            .await
    }

    async fn container_remove(&self, id: &str, options: RemoveOptions) -> RuntimeResult<()> {
        let options = Some(RemoveContainerOptions {
            v: options.remove_volumes,
            force: options.force,
            link: options.remove_links,
        });
        self.call("container_remove", self.client.remove_container(id, options))
            .await
    }

    async fn image_remove(&self, image: &str, options: ImageRemoveOptions) -> RuntimeResult<()> {
        let options = Some(RemoveImageOptions {
            force: options.force,
            noprune: options.no_prune,
        });
        let removed = self
            .call("image_remove", self.client.remove_image(image, options, None))
            .await?;
        debug!(image = %image, entries = removed.len(), "image removed");
        Ok(())
    }

    async fn network_connect(
        &self,
        network: &str,
        container: &str,
        aliases: &[String],
    ) -> RuntimeResult<()> {
        let options = ConnectNetworkOptions {
            container: container.to_string(),
            endpoint_config: EndpointSettings {
                aliases: non_empty(aliases),
                ..Default::default()
            },
        };
        self.call(
            "network_connect",
            self.client.connect_network(network, options),
        )
        .await
    }

    async fn network_create(&self, name: &str, options: NetworkCreateOptions) -> RuntimeResult<()> {
        let config = CreateNetworkOptions {
            name: name.to_string(),
            driver: "bridge".to_string(),
            enable_ipv6: options.ipv6,
            ..Default::default()
        };
        let response = self
            .call("network_create", self.client.create_network(config))
            .await?;
        debug!(network = %name, id = ?response.id, "network created");
        Ok(())
    }

    async fn container_query_by_field(
        &self,
        field: &str,
        values: &[String],
    ) -> RuntimeResult<Vec<ContainerSummary>> {
        let options = Some(ListContainersOptions::<String> {
            all: true,
            filters: HashMap::from([(field.to_string(), values.to_vec())]),
            ..Default::default()
        });

        let containers = self
            .call("container_query_by_field", self.client.list_containers(options))
            .await?;

        Ok(containers
            .into_iter()
            .map(|summary| ContainerSummary {
                id: summary.id.unwrap_or_default(),
                names: summary.names.unwrap_or_default(),
                image: summary.image.unwrap_or_default(),
                state: summary.state.map(|state| state.to_string()),
                public_ports: summary
                    .ports
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|port| port.public_port)
                    .collect(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};

    fn request() -> ContainerCreateRequest {
        ContainerCreateRequest {
            name: "site-1-abc".to_string(),
            image: "nginx:latest".to_string(),
            env: vec!["MODE=prod".to_string()],
            port_bindings: BTreeMap::from([("80/tcp".to_string(), 8080)]),
            binds: vec!["/srv/www:/usr/share/nginx/html:ro".to_string()],
            anonymous_volumes: BTreeSet::from(["/var/cache/nginx".to_string()]),
            restart: RestartPolicy::UnlessStopped,
            memory: Some(256 * 1024 * 1024),
            ..Default::default()
        }
    }

    #[test]
    fn container_config_maps_ports_and_volumes() {
        let config = container_config(&request());
        let host = config.host_config.unwrap();

        let bindings = host.port_bindings.unwrap();
        let binding = bindings["80/tcp"].as_ref().unwrap();
        assert_eq!(binding[0].host_port.as_deref(), Some("8080"));
        assert!(config.exposed_ports.unwrap().contains_key("80/tcp"));
        assert!(config.volumes.unwrap().contains_key("/var/cache/nginx"));
        assert_eq!(
            host.binds,
            Some(vec!["/srv/www:/usr/share/nginx/html:ro".to_string()])
        );
        assert_eq!(
            host.restart_policy.unwrap().name,
            Some(RestartPolicyNameEnum::UNLESS_STOPPED)
        );
        assert_eq!(host.memory, Some(256 * 1024 * 1024));
        assert_eq!(host.cpu_shares, None);
    }

    #[test]
    fn container_config_leaves_empty_facets_unset() {
        let config = container_config(&ContainerCreateRequest {
            name: "bare".to_string(),
            image: "busybox:latest".to_string(),
            ..Default::default()
        });

        assert!(config.env.is_none());
        assert!(config.exposed_ports.is_none());
        assert!(config.volumes.is_none());
        let host = config.host_config.unwrap();
        assert!(host.port_bindings.is_none());
        assert!(host.binds.is_none());
        assert!(host.network_mode.is_none());
    }

    #[test]
    fn daemon_errors_keep_their_message() {
        let err = RuntimeError::from(BollardError::DockerResponseServerError {
            status_code: 404,
            message: "no such image".to_string(),
        });
        assert_eq!(err, RuntimeError::NotFound("no such image".to_string()));
        assert_eq!(err.to_string(), "no such image");

        let err = RuntimeError::from(BollardError::DockerResponseServerError {
            status_code: 403,
            message: "endpoint with name db already exists in network site-1".to_string(),
        });
        assert!(matches!(err, RuntimeError::Conflict(_)));

        let err = RuntimeError::from(BollardError::DockerResponseServerError {
            status_code: 500,
            message: "driver failed programming external connectivity".to_string(),
        });
        assert_eq!(
            err,
            RuntimeError::Daemon {
                status: 500,
                message: "driver failed programming external connectivity".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn bounded_call_times_out() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<(), BollardError>(())
        };
        let err = bounded("container_start", Duration::from_millis(10), slow)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Timeout {
                operation: "container_start",
                ..
            }
        ));
    }
}
