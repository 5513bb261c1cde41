use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tasks::types::RunParams;

pub type SiteId = u64;

/// Persisted site status. `Processing` is never written by the worker; it
/// exists for collaborators that want to flag an in-flight attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteStatus {
    #[default]
    Stopped,
    Processing,
    Success,
    Error,
}

impl fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            SiteStatus::Stopped => "stopped",
            SiteStatus::Processing => "processing",
            SiteStatus::Success => "success",
            SiteStatus::Error => "error",
        };
        write!(f, "{status}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    pub id: SiteId,
    /// Human-facing title given at creation.
    pub title: String,
    /// Workload (container) name, unique per site.
    pub name: String,
    pub status: SiteStatus,
    pub message: String,
    pub container_id: Option<String>,
    pub run_params: RunParams,
}

pub type SiteRepositoryResult<T> = Result<T, SiteRepositoryError>;

#[derive(Debug, Clone, Error)]
pub enum SiteRepositoryError {
    #[error("site not found: {0}")]
    NotFound(SiteId),

    #[error("persistence error: {0}")]
    Persistence(Arc<dyn std::error::Error + Send + Sync>),
}

/// Persistence contract for site rows. The worker only uses the two
/// `update_*` writers.
#[async_trait]
pub trait SiteRepository: Send + Sync {
    /// Stores a new row in `Stopped` state with an empty workload name and
    /// returns it with its assigned id.
    async fn insert(&self, title: &str, run_params: RunParams) -> SiteRepositoryResult<Site>;

    async fn set_name(&self, id: SiteId, name: &str) -> SiteRepositoryResult<()>;

    async fn update_run_params(&self, id: SiteId, run_params: RunParams)
    -> SiteRepositoryResult<()>;

    async fn get(&self, id: SiteId) -> SiteRepositoryResult<Option<Site>>;

    async fn list(&self) -> SiteRepositoryResult<Vec<Site>>;

    async fn delete(&self, id: SiteId) -> SiteRepositoryResult<()>;

    async fn update_site_status(
        &self,
        id: SiteId,
        status: SiteStatus,
        message: &str,
    ) -> SiteRepositoryResult<()>;

    /// `None` clears the id once the container is gone.
    async fn update_site_container_info(
        &self,
        id: SiteId,
        container_id: Option<&str>,
    ) -> SiteRepositoryResult<()>;
}
