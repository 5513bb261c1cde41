//! Container spec builder.
//!
//! [`ContainerSpecBuilder`] is a plain value: every facet consumes the
//! builder and hands it back, and [`ContainerSpecBuilder::build`] freezes it
//! into a [`ContainerSpec`]. Facets are keyed, so setting the same key twice
//! replaces the earlier value instead of adding a duplicate.
//!
//! The spec carries the creation request plus the network attachments to
//! perform once the container exists. Attaching custom networks at creation
//! time makes the runtime drop the default bridge (and with it the published
//! ports), so all attachments are deferred.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use super::runtime::{ContainerCreateRequest, ContainerRuntime, NetworkCreateOptions, RuntimeError};
use super::types::{
    ImageRef, NetworkMode, Permission, PortProtocol, ResourceLimit, RestartPolicy, TaskError,
    TaskResult,
};

pub const DEFAULT_POD_DOMAIN: &str = "sitekeeper.local";

/// Container a post-creation attachment applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachTarget {
    /// The container created from this spec.
    Workload,
    /// Another existing container, by name (a link target).
    Container(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkAttachment {
    pub network: String,
    pub target: AttachTarget,
    pub aliases: Vec<String>,
}

/// Network created for one workload when it needs link aliasing or IPv6.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerNetwork {
    pub name: String,
    pub ipv6: bool,
}

/// Frozen output of the builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub request: ContainerCreateRequest,
    pub pull_image: bool,
    pub owner_network: Option<OwnerNetwork>,
    /// In execution order: owner network first, then named networks.
    pub attachments: Vec<NetworkAttachment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Bind {
    host: String,
    dest: String,
    permission: Permission,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LinkEntry {
    name: String,
    alias: String,
    import_volumes: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct NetworkEntry {
    name: String,
    aliases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpecBuilder {
    name: String,
    pod_domain: String,
    image: String,
    pull_image: bool,
    ipv6: bool,
    ports: BTreeMap<String, u16>,
    env: Vec<(String, String)>,
    binds: Vec<Bind>,
    default_volumes: Vec<String>,
    links: Vec<LinkEntry>,
    networks: Vec<NetworkEntry>,
    limits: BTreeMap<ResourceLimit, i64>,
    restart: RestartPolicy,
    privileged: bool,
    work_dir: Option<String>,
    user: Option<String>,
    command: Option<Vec<String>>,
    entrypoint: Option<Vec<String>>,
    network_mode: Option<NetworkMode>,
}

fn upsert<T>(items: &mut Vec<T>, item: T, same_key: impl Fn(&T) -> bool) {
    match items.iter_mut().find(|existing| same_key(existing)) {
        Some(existing) => *existing = item,
        None => items.push(item),
    }
}

fn non_blank(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Splits a command line on whitespace, honouring single and double quotes.
pub fn split_command(command: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut in_arg = false;

    for ch in command.chars() {
        match quote {
            Some(open) if ch == open => quote = None,
            Some(_) => current.push(ch),
            None if ch == '"' || ch == '\'' => {
                quote = Some(ch);
                in_arg = true;
            }
            None if ch.is_whitespace() => {
                if in_arg {
                    args.push(std::mem::take(&mut current));
                    in_arg = false;
                }
            }
            None => {
                current.push(ch);
                in_arg = true;
            }
        }
    }

    if in_arg {
        args.push(current);
    }
    args
}

impl ContainerSpecBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pod_domain: DEFAULT_POD_DOMAIN.to_string(),
            image: String::new(),
            pull_image: false,
            ipv6: false,
            ports: BTreeMap::new(),
            env: Vec::new(),
            binds: Vec::new(),
            default_volumes: Vec::new(),
            links: Vec::new(),
            networks: Vec::new(),
            limits: BTreeMap::new(),
            restart: RestartPolicy::No,
            privileged: false,
            work_dir: None,
            user: None,
            command: None,
            entrypoint: None,
            network_mode: None,
        }
    }

    pub fn with_pod_domain(mut self, domain: &str) -> Self {
        if let Some(domain) = non_blank(domain) {
            self.pod_domain = domain;
        }
        self
    }

    pub fn with_image(mut self, image: &ImageRef, pull: bool) -> Self {
        self.image = image.reference();
        self.pull_image = pull;
        self
    }

    /// Keyed by the container side (`dest/proto`).
    pub fn with_port(mut self, host: u16, dest: u16, protocol: PortProtocol) -> Self {
        self.ports.insert(format!("{dest}/{protocol}"), host);
        self
    }

    /// An empty name drops the entry; an empty value is kept.
    pub fn with_env(mut self, name: &str, value: &str) -> Self {
        if name.is_empty() {
            return self;
        }
        upsert(
            &mut self.env,
            (name.to_string(), value.to_string()),
            |(existing, _)| existing == name,
        );
        self
    }

    /// Host bind mount. Skipped unless both paths are set.
    pub fn with_volume(mut self, host: &str, dest: &str, permission: Permission) -> Self {
        let (Some(host), Some(dest)) = (non_blank(host), non_blank(dest)) else {
            return self;
        };
        let key = dest.clone();
        upsert(
            &mut self.binds,
            Bind {
                host,
                dest,
                permission,
            },
            |bind| bind.dest == key,
        );
        self
    }

    /// Anonymous volume at `dest`, unless a bind mount targets the same path.
    pub fn with_default_volume(mut self, dest: &str) -> Self {
        if let Some(dest) = non_blank(dest) {
            if !self.default_volumes.contains(&dest) {
                self.default_volumes.push(dest);
            }
        }
        self
    }

    /// Links require the owner network; an empty alias means the target name.
    pub fn with_link(mut self, name: &str, alias: &str, import_volumes: bool) -> Self {
        let Some(name) = non_blank(name) else {
            return self;
        };
        let alias = non_blank(alias).unwrap_or_else(|| name.clone());
        let key = name.clone();
        upsert(
            &mut self.links,
            LinkEntry {
                name,
                alias,
                import_volumes,
            },
            |link| link.name == key,
        );
        self
    }

    pub fn with_network_config(mut self, name: &str, aliases: &[String]) -> Self {
        let Some(name) = non_blank(name) else {
            return self;
        };
        let aliases: Vec<String> = aliases.iter().filter_map(|alias| non_blank(alias)).collect();
        let key = name.clone();
        upsert(
            &mut self.networks,
            NetworkEntry { name, aliases },
            |network| network.name == key,
        );
        self
    }

    /// Zero or negative clears the limit back to the runtime default.
    pub fn with_resource_limit(mut self, kind: ResourceLimit, value: i64) -> Self {
        if value > 0 {
            self.limits.insert(kind, value);
        } else {
            self.limits.remove(&kind);
        }
        self
    }

    pub fn with_restart(mut self, policy: RestartPolicy) -> Self {
        self.restart = policy;
        self
    }

    pub fn with_privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    pub fn with_work_dir(mut self, dir: &str) -> Self {
        self.work_dir = non_blank(dir);
        self
    }

    pub fn with_user(mut self, user: &str) -> Self {
        self.user = non_blank(user);
        self
    }

    pub fn with_command(mut self, command: &str) -> Self {
        let args = split_command(command);
        self.command = (!args.is_empty()).then_some(args);
        self
    }

    pub fn with_entrypoint(mut self, entrypoint: &str) -> Self {
        let args = split_command(entrypoint);
        self.entrypoint = (!args.is_empty()).then_some(args);
        self
    }

    pub fn with_network_mode(mut self, mode: NetworkMode) -> Self {
        self.network_mode = Some(mode);
        self
    }

    pub fn with_ipv6(mut self, enabled: bool) -> Self {
        self.ipv6 = enabled;
        self
    }

    /// Alias the workload answers to on its own network.
    pub fn owner_alias(&self) -> String {
        format!("{}.pod.{}", self.name, self.pod_domain)
    }

    fn needs_owner_network(&self) -> bool {
        self.ipv6 || !self.links.is_empty()
    }

    fn attachments(&self) -> Vec<NetworkAttachment> {
        let mut attachments = Vec::new();

        if self.needs_owner_network() {
            attachments.push(NetworkAttachment {
                network: self.name.clone(),
                target: AttachTarget::Workload,
                aliases: vec![self.owner_alias()],
            });
            for link in &self.links {
                attachments.push(NetworkAttachment {
                    network: self.name.clone(),
                    target: AttachTarget::Container(link.name.clone()),
                    aliases: vec![link.alias.clone()],
                });
            }
        }

        for network in &self.networks {
            if network.name == self.name {
                continue;
            }
            if network.aliases.is_empty() {
                attachments.push(NetworkAttachment {
                    network: network.name.clone(),
                    target: AttachTarget::Workload,
                    aliases: Vec::new(),
                });
            }
            for alias in &network.aliases {
                attachments.push(NetworkAttachment {
                    network: network.name.clone(),
                    target: AttachTarget::Workload,
                    aliases: vec![alias.clone()],
                });
            }
        }

        attachments
    }

    pub fn build(self) -> ContainerSpec {
        let owner_network = self.needs_owner_network().then(|| OwnerNetwork {
            name: self.name.clone(),
            ipv6: self.ipv6,
        });
        let attachments = self.attachments();

        let bound: BTreeSet<&str> = self.binds.iter().map(|bind| bind.dest.as_str()).collect();
        let anonymous_volumes = self
            .default_volumes
            .iter()
            .filter(|dest| !bound.contains(dest.as_str()))
            .cloned()
            .collect();

        let binds = self
            .binds
            .iter()
            .map(|bind| format!("{}:{}:{}", bind.host, bind.dest, bind.permission.mode()))
            .collect();

        let volumes_from = self
            .links
            .iter()
            .filter(|link| link.import_volumes)
            .map(|link| link.name.clone())
            .collect();

        let request = ContainerCreateRequest {
            name: self.name,
            image: self.image,
            env: self
                .env
                .into_iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect(),
            cmd: self.command,
            entrypoint: self.entrypoint,
            working_dir: self.work_dir,
            user: self.user,
            port_bindings: self.ports,
            binds,
            anonymous_volumes,
            volumes_from,
            privileged: self.privileged,
            restart: self.restart,
            cpu_shares: self.limits.get(&ResourceLimit::CpuShares).copied(),
            memory: self.limits.get(&ResourceLimit::Memory).copied(),
            shm_size: self.limits.get(&ResourceLimit::ShmSize).copied(),
            network_mode: self.network_mode.map(|mode| mode.as_str().to_string()),
        };

        ContainerSpec {
            request,
            pull_image: self.pull_image,
            owner_network,
            attachments,
        }
    }
}

impl ContainerSpec {
    /// Creates the owner network (if any), pulls the image when asked, and
    /// creates the container. Returns the runtime container id.
    ///
    /// An owner network left over from an earlier attempt is reused.
    pub async fn execute(&self, runtime: &dyn ContainerRuntime) -> TaskResult<String> {
        if let Some(network) = &self.owner_network {
            let options = NetworkCreateOptions { ipv6: network.ipv6 };
            match runtime.network_create(&network.name, options).await {
                Ok(()) => debug!(network = %network.name, ipv6 = network.ipv6, "owner network created"),
                Err(RuntimeError::Conflict(message)) => {
                    debug!(network = %network.name, %message, "owner network already exists")
                }
                Err(err) => return Err(TaskError::RuntimeSubmit(err)),
            }
        }

        if self.pull_image {
            runtime
                .image_pull(&self.request.image)
                .await
                .map_err(TaskError::RuntimeSubmit)?;
        }

        runtime
            .container_create(&self.request)
            .await
            .map_err(TaskError::RuntimeSubmit)
    }
}
