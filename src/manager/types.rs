use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::site::{Site, SiteId, SiteLocks, SiteRepository, SiteRepositoryError, SiteStatus};
use crate::tasks::runtime::{ContainerRuntime, RuntimeError};
use crate::tasks::types::{ImageRef, RunParams};
use crate::worker::{QueueError, TaskSender};

/// Submission boundary: validates requests, manages site rows and hands
/// provisioning work to the queue.
#[derive(Clone)]
pub struct Manager {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub sites: Arc<dyn SiteRepository>,
    pub queue: TaskSender,
    pub locks: SiteLocks,
}

pub struct SiteServer {
    pub address: String,
    pub port: u16,
    pub manager: Arc<Manager>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSiteRequest {
    pub title: String,
    #[serde(flatten)]
    pub params: RunParams,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RedeploySiteRequest {
    /// Replaces the stored image before the new attempt.
    pub image: Option<ImageRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeleteSiteOptions {
    pub remove_volumes: bool,
    pub remove_links: bool,
    pub remove_image: bool,
}

pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Paging and filters for the site list. Pages start at 1.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ListSitesQuery {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
    /// Case-insensitive substring of the title.
    #[serde(alias = "siteName")]
    pub title: Option<String>,
    pub status: Option<SiteStatus>,
}

/// One page of sites, newest first, with the filtered total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SitePage {
    pub total: usize,
    pub page: usize,
    pub list: Vec<Site>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("site title must not be empty")]
    EmptyTitle,

    #[error("image must not be empty")]
    EmptyImage,

    #[error("host port {0} is bound more than once")]
    DuplicateHostPort(u16),

    #[error("host ports already in use: {}", format_ports(.ports))]
    PortInUse { ports: Vec<u16> },
}

fn format_ports(ports: &[u16]) -> String {
    ports
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("site not found: {0}")]
    SiteNotFound(SiteId),

    #[error("container runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Repository(#[from] SiteRepositoryError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

pub type ManagerResult<T> = Result<T, ManagerError>;
