#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use sitekeeper::manager::Manager;
use sitekeeper::site::{InMemorySiteRepository, SiteLocks, StatusReporter};
use sitekeeper::tasks::runtime::{
    ContainerCreateRequest, ContainerRuntime, ContainerSummary, ImageRemoveOptions,
    NetworkCreateOptions, RemoveOptions, RuntimeError, RuntimeResult, StopOptions,
};
use sitekeeper::worker::{TaskReceiver, Worker, task_queue};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ImagePull(String),
    ContainerCreate(ContainerCreateRequest),
    ContainerStart(String),
    ContainerStop(String),
    ContainerRemove(String, RemoveOptions),
    ImageRemove(String),
    NetworkConnect {
        network: String,
        container: String,
        aliases: Vec<String>,
    },
    NetworkCreate {
        name: String,
        ipv6: bool,
    },
    Query {
        field: String,
        values: Vec<String>,
    },
}

/// In-memory runtime that records every call and fails on request.
#[derive(Default)]
pub struct RecordingRuntime {
    calls: Mutex<Vec<Call>>,
    failures: Mutex<HashMap<&'static str, RuntimeError>>,
    published: Mutex<Vec<u16>>,
    created: Mutex<u32>,
}

impl RecordingRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes every later call to `operation` fail with `err`.
    pub fn fail(&self, operation: &'static str, err: RuntimeError) {
        self.failures.lock().unwrap().insert(operation, err);
    }

    /// Host ports some other container already publishes.
    pub fn publish(&self, ports: &[u16]) {
        self.published.lock().unwrap().extend_from_slice(ports);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn created_names(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::ContainerCreate(request) => Some(request.name),
                _ => None,
            })
            .collect()
    }

    fn record(&self, operation: &'static str, call: Call) -> RuntimeResult<()> {
        self.calls.lock().unwrap().push(call);
        match self.failures.lock().unwrap().get(operation) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ContainerRuntime for RecordingRuntime {
    async fn ping(&self) -> RuntimeResult<()> {
        Ok(())
    }

    async fn image_pull(&self, reference: &str) -> RuntimeResult<()> {
        self.record("image_pull", Call::ImagePull(reference.to_string()))
    }

    async fn container_create(&self, request: &ContainerCreateRequest) -> RuntimeResult<String> {
        self.record("container_create", Call::ContainerCreate(request.clone()))?;
        let mut created = self.created.lock().unwrap();
        *created += 1;
        Ok(format!("container-{created}"))
    }

    async fn container_start(&self, id: &str) -> RuntimeResult<()> {
        self.record("container_start", Call::ContainerStart(id.to_string()))
    }

    async fn container_stop(&self, id: &str, _options: StopOptions) -> RuntimeResult<()> {
        self.record("container_stop", Call::ContainerStop(id.to_string()))
    }

    async fn container_remove(&self, id: &str, options: RemoveOptions) -> RuntimeResult<()> {
        self.record("container_remove", Call::ContainerRemove(id.to_string(), options))
    }

    async fn image_remove(&self, image: &str, _options: ImageRemoveOptions) -> RuntimeResult<()> {
        self.record("image_remove", Call::ImageRemove(image.to_string()))
    }

    async fn network_connect(
        &self,
        network: &str,
        container: &str,
        aliases: &[String],
    ) -> RuntimeResult<()> {
        self.record(
            "network_connect",
            Call::NetworkConnect {
                network: network.to_string(),
                container: container.to_string(),
                aliases: aliases.to_vec(),
            },
        )
    }

    async fn network_create(&self, name: &str, options: NetworkCreateOptions) -> RuntimeResult<()> {
        self.record(
            "network_create",
            Call::NetworkCreate {
                name: name.to_string(),
                ipv6: options.ipv6,
            },
        )
    }

    async fn container_query_by_field(
        &self,
        field: &str,
        values: &[String],
    ) -> RuntimeResult<Vec<ContainerSummary>> {
        self.record(
            "container_query_by_field",
            Call::Query {
                field: field.to_string(),
                values: values.to_vec(),
            },
        )?;

        let published = self.published.lock().unwrap();
        let holders = values
            .iter()
            .filter_map(|value| value.parse::<u16>().ok())
            .filter(|port| published.contains(port))
            .map(|port| ContainerSummary {
                id: format!("holder-{port}"),
                names: vec![format!("/holder-{port}")],
                image: "busybox:latest".to_string(),
                state: Some("running".to_string()),
                public_ports: vec![port],
            })
            .collect();
        Ok(holders)
    }
}

pub struct Harness {
    pub runtime: Arc<RecordingRuntime>,
    pub sites: Arc<InMemorySiteRepository>,
    pub locks: SiteLocks,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            runtime: RecordingRuntime::new(),
            sites: Arc::new(InMemorySiteRepository::new()),
            locks: SiteLocks::new(),
        }
    }

    pub fn worker(&self) -> Worker {
        Worker::new(
            "test_worker",
            self.runtime.clone(),
            StatusReporter::new(self.sites.clone()),
            self.locks.clone(),
            "example.local",
        )
    }

    /// Manager wired to a fresh unbounded queue.
    pub fn manager(&self) -> (Manager, TaskReceiver) {
        let (sender, receiver) = task_queue(None);
        let manager = Manager::new(
            self.runtime.clone(),
            self.sites.clone(),
            sender,
            self.locks.clone(),
        );
        (manager, receiver)
    }
}
