use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::queue::TaskReceiver;
use super::types::{TaskOutcome, Worker};
use crate::site::{SiteId, SiteLocks, StatusReporter};
use crate::tasks::{
    builder::{AttachTarget, ContainerSpec, ContainerSpecBuilder},
    runtime::{ContainerRuntime, RuntimeError},
    state::valid_state_transition,
    types::{CreateMessage, NetworkMode, ResourceLimit, State, TaskError, TaskResult},
};

/// Tracks one task through the provisioning state machine.
struct TaskRun {
    task_id: uuid::Uuid,
    site_id: SiteId,
    state: State,
}

impl TaskRun {
    fn new(message: &CreateMessage) -> Self {
        Self {
            task_id: message.task_id,
            site_id: message.site_id,
            state: State::Received,
        }
    }

    fn advance(&mut self, next: State) {
        if !valid_state_transition(&self.state, &next) {
            error!(
                task_id = %self.task_id,
                site_id = self.site_id,
                "Invalid state transition from {:?} to {:?}",
                self.state,
                next
            );
        }
        debug!(task_id = %self.task_id, from = ?self.state, to = ?next, "task state");
        self.state = next;
    }
}

/// Translates a queued request into a frozen container spec.
pub fn spec_for(message: &CreateMessage, pod_domain: &str) -> ContainerSpec {
    let params = &message.run_params;

    let mut builder = ContainerSpecBuilder::new(&message.name)
        .with_pod_domain(pod_domain)
        .with_image(&params.image, params.pull_image)
        .with_ipv6(params.bind_ipv6)
        .with_restart(params.restart)
        .with_resource_limit(ResourceLimit::CpuShares, params.cpu_shares)
        .with_resource_limit(ResourceLimit::Memory, params.memory)
        .with_resource_limit(ResourceLimit::ShmSize, params.shm_size)
        .with_work_dir(&params.work_dir)
        .with_user(&params.user)
        .with_command(&params.command)
        .with_entrypoint(&params.entrypoint);

    for port in &params.ports {
        builder = builder.with_port(port.host, port.dest, port.protocol);
    }
    for env in &params.environment {
        builder = builder.with_env(&env.name, &env.value);
    }
    for link in &params.links {
        builder = builder.with_link(&link.name, &link.alias, link.volume);
    }
    for volume in &params.volumes_default {
        builder = builder.with_default_volume(&volume.dest);
    }
    for volume in &params.volumes {
        builder = builder.with_volume(&volume.host, &volume.dest, volume.permission);
    }
    for network in &params.networks {
        builder = builder.with_network_config(&network.name, &network.aliases);
    }
    if params.privileged {
        builder = builder.with_privileged();
    }
    if params.use_host_network {
        builder = builder.with_network_mode(NetworkMode::Host);
    }

    builder.build()
}

impl Worker {
    pub fn new(
        name: &str,
        runtime: Arc<dyn ContainerRuntime>,
        reporter: StatusReporter,
        locks: SiteLocks,
        pod_domain: &str,
    ) -> Self {
        Worker {
            name: name.to_string(),
            runtime,
            reporter,
            locks,
            pod_domain: pod_domain.to_string(),
            task_count: 0,
        }
    }

    /// Runs one task to a terminal state and writes the outcome to the site
    /// row. Nothing is retried.
    pub async fn run_task(&mut self, message: CreateMessage) -> TaskOutcome {
        let _site_guard = self.locks.lock(message.site_id).await;
        let mut run = TaskRun::new(&message);
        self.task_count += 1;

        if !self.reporter.site_exists(message.site_id).await {
            warn!(
                task_id = %message.task_id,
                site_id = message.site_id,
                "site no longer exists, dropping task"
            );
            run.advance(State::Error);
            return TaskOutcome {
                task_id: message.task_id,
                site_id: message.site_id,
                state: run.state,
                container_id: None,
                failure: None,
                message: format!("site {} no longer exists", message.site_id),
            };
        }

        info!(
            task_id = %message.task_id,
            site_id = message.site_id,
            name = %message.name,
            image = %message.run_params.image,
            "Provisioning site"
        );

        match self.provision(&message, &mut run).await {
            Ok(container_id) => {
                run.advance(State::Success);
                if let Err(err) = self
                    .reporter
                    .report_success(message.site_id, &container_id)
                    .await
                {
                    error!(site_id = message.site_id, error = %err, "failed to record success");
                }

                TaskOutcome {
                    task_id: message.task_id,
                    site_id: message.site_id,
                    state: run.state,
                    container_id: Some(container_id),
                    failure: None,
                    message: String::new(),
                }
            }
            Err(err) => {
                run.advance(State::Error);
                if let Err(report_err) = self.reporter.report_failure(message.site_id, &err).await {
                    error!(site_id = message.site_id, error = %report_err, "failed to record failure");
                }

                TaskOutcome {
                    task_id: message.task_id,
                    site_id: message.site_id,
                    state: run.state,
                    container_id: None,
                    failure: Some(err.kind()),
                    message: err.to_string(),
                }
            }
        }
    }

    async fn provision(&self, message: &CreateMessage, run: &mut TaskRun) -> TaskResult<String> {
        run.advance(State::Building);
        let spec = spec_for(message, &self.pod_domain);

        let container_id = spec.execute(self.runtime.as_ref()).await?;
        run.advance(State::Submitted);
        info!(task_id = %message.task_id, container_id = %container_id, "Container created");

        run.advance(State::NetworkAttaching);
        self.attach_networks(&spec, &container_id).await?;

        run.advance(State::Starting);
        self.runtime
            .container_start(&container_id)
            .await
            .map_err(TaskError::Start)?;
        info!(task_id = %message.task_id, container_id = %container_id, "Container started");

        Ok(container_id)
    }

    /// Performs the attachments in spec order, one alias per call. The first
    /// failure aborts; the container stays created but unstarted.
    async fn attach_networks(&self, spec: &ContainerSpec, container_id: &str) -> TaskResult<()> {
        for attachment in &spec.attachments {
            let container = match &attachment.target {
                AttachTarget::Workload => container_id,
                AttachTarget::Container(name) => name.as_str(),
            };

            match self
                .runtime
                .network_connect(&attachment.network, container, &attachment.aliases)
                .await
            {
                Ok(()) => debug!(
                    network = %attachment.network,
                    container = %container,
                    aliases = ?attachment.aliases,
                    "network attached"
                ),
                // A link target survives redeploys of the linking site and is
                // usually still attached.
                Err(RuntimeError::Conflict(message))
                    if matches!(attachment.target, AttachTarget::Container(_)) =>
                {
                    debug!(network = %attachment.network, container = %container, %message, "link target already attached")
                }
                Err(source) => {
                    return Err(TaskError::NetworkAttach {
                        network: attachment.network.clone(),
                        container: container.to_string(),
                        source,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Consumes the queue one task at a time until every sender is dropped.
pub async fn run_tasks(mut worker: Worker, mut queue: TaskReceiver) {
    info!(worker = %worker.name, "Worker started, waiting for tasks");

    while let Some(message) = queue.recv().await {
        let outcome = worker.run_task(message).await;
        debug!(
            worker = %worker.name,
            task_id = %outcome.task_id,
            site_id = outcome.site_id,
            state = ?outcome.state,
            "task finished"
        );
    }

    info!(
        worker = %worker.name,
        processed = worker.task_count,
        "Task queue closed, worker stopping"
    );
}
