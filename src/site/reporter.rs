use std::sync::Arc;

use tracing::{info, warn};

use super::types::{SiteId, SiteRepository, SiteRepositoryResult, SiteStatus};
use crate::tasks::types::TaskError;

/// Writes provisioning outcomes onto the persisted site row.
#[derive(Clone)]
pub struct StatusReporter {
    sites: Arc<dyn SiteRepository>,
}

impl StatusReporter {
    pub fn new(sites: Arc<dyn SiteRepository>) -> Self {
        Self { sites }
    }

    /// False only when the row is known to be gone. A lookup failure counts
    /// as present so the attempt still runs and reports.
    pub async fn site_exists(&self, site_id: SiteId) -> bool {
        match self.sites.get(site_id).await {
            Ok(site) => site.is_some(),
            Err(err) => {
                warn!(site_id, error = %err, "site lookup failed");
                true
            }
        }
    }

    /// Records the container identity, then `Success` with the message
    /// cleared.
    pub async fn report_success(&self, site_id: SiteId, container_id: &str) -> SiteRepositoryResult<()> {
        self.sites
            .update_site_container_info(site_id, Some(container_id))
            .await?;
        self.sites
            .update_site_status(site_id, SiteStatus::Success, "")
            .await?;

        info!(site_id, container_id = %container_id, "site provisioned");
        Ok(())
    }

    /// Records `Error` with the runtime's message. The failure kind is only
    /// logged; the persisted row carries the text.
    pub async fn report_failure(&self, site_id: SiteId, err: &TaskError) -> SiteRepositoryResult<()> {
        warn!(site_id, kind = ?err.kind(), error = %err, "provisioning failed");
        self.sites
            .update_site_status(site_id, SiteStatus::Error, &err.to_string())
            .await
    }
}
