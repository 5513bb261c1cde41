use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::types::{
    CreateSiteRequest, DEFAULT_PAGE_SIZE, DeleteSiteOptions, ListSitesQuery, Manager,
    ManagerError, ManagerResult, SitePage, ValidationError,
};
use crate::site::{Site, SiteId, SiteLocks, SiteRepository, SiteStatus};
use crate::tasks::runtime::{
    ContainerRuntime, ImageRemoveOptions, RemoveOptions, RuntimeError, StopOptions,
};
use crate::tasks::types::{CreateMessage, ImageRef, PortBinding, RunParams};
use crate::worker::TaskSender;

/// Grace period given to a container before the runtime kills it.
const STOP_TIMEOUT_SECS: i64 = 10;

/// `site-<id>-<10 random hex chars>`.
pub fn workload_name(site_id: SiteId) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("site-{}-{}", site_id, &suffix[..10])
}

fn validate(title: &str, params: &RunParams) -> Result<(), ValidationError> {
    if title.trim().is_empty() {
        return Err(ValidationError::EmptyTitle);
    }
    if params.image.is_empty() {
        return Err(ValidationError::EmptyImage);
    }

    let mut seen = BTreeSet::new();
    for port in params.ports.iter().filter(|port| port.host != 0) {
        if !seen.insert((port.host, port.protocol)) {
            return Err(ValidationError::DuplicateHostPort(port.host));
        }
    }
    Ok(())
}

impl ListSitesQuery {
    /// Filters `sites` (already newest first) and cuts out the requested
    /// page. A page past the end is empty.
    pub fn apply(&self, sites: Vec<Site>) -> SitePage {
        let page = self.page.filter(|page| *page > 0).unwrap_or(1);
        let page_size = self
            .page_size
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE);
        let title = self
            .title
            .as_deref()
            .map(str::trim)
            .filter(|title| !title.is_empty())
            .map(str::to_lowercase);

        let matching: Vec<Site> = sites
            .into_iter()
            .filter(|site| self.status.is_none_or(|status| site.status == status))
            .filter(|site| {
                title
                    .as_deref()
                    .is_none_or(|title| site.title.to_lowercase().contains(title))
            })
            .collect();

        let total = matching.len();
        let list = matching
            .into_iter()
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .collect();

        SitePage { total, page, list }
    }
}

/// Treats "already gone" and "already stopped" as done.
fn ignore_missing(result: Result<(), RuntimeError>) -> Result<(), RuntimeError> {
    match result {
        Err(RuntimeError::NotFound(_)) | Err(RuntimeError::Daemon { status: 304, .. }) => Ok(()),
        other => other,
    }
}

impl Manager {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        sites: Arc<dyn SiteRepository>,
        queue: TaskSender,
        locks: SiteLocks,
    ) -> Self {
        Manager {
            runtime,
            sites,
            queue,
            locks,
        }
    }

    /// Validates, stores a new `stopped` row and queues its first
    /// provisioning attempt. The outcome lands on the row later.
    pub async fn create_site(&self, request: CreateSiteRequest) -> ManagerResult<Site> {
        let CreateSiteRequest { title, params } = request;
        validate(&title, &params)?;
        self.check_port_conflicts(&params.ports).await?;

        let mut site = self.sites.insert(title.trim(), params).await?;
        site.name = workload_name(site.id);
        if let Err(err) = self.sites.set_name(site.id, &site.name).await {
            if let Err(cleanup_err) = self.sites.delete(site.id).await {
                warn!(site_id = site.id, error = %cleanup_err, "Failed to drop unnamed site");
            }
            return Err(err.into());
        }

        info!(site_id = site.id, name = %site.name, image = %site.run_params.image, "Site created");
        self.submit(&site).await?;
        Ok(site)
    }

    /// Tears down the current container and queues a fresh attempt with the
    /// stored params, optionally swapping in a new image first. The row
    /// forgets the removed container id right away.
    pub async fn redeploy_site(&self, site_id: SiteId, image: Option<ImageRef>) -> ManagerResult<Site> {
        let site = {
            let _guard = self.locks.lock(site_id).await;
            let mut site = self.find(site_id).await?;

            self.teardown(&site, RemoveOptions::default()).await?;
            self.sites.update_site_container_info(site_id, None).await?;
            site.container_id = None;

            if let Some(image) = image.filter(|image| !image.is_empty()) {
                site.run_params.image = image;
                self.sites
                    .update_run_params(site_id, site.run_params.clone())
                    .await?;
            }
            site
        };

        info!(site_id, name = %site.name, image = %site.run_params.image, "Redeploying site");
        self.submit(&site).await?;
        Ok(site)
    }

    pub async fn delete_site(&self, site_id: SiteId, options: DeleteSiteOptions) -> ManagerResult<()> {
        {
            let _guard = self.locks.lock(site_id).await;
            let site = self.find(site_id).await?;

            let remove = RemoveOptions {
                remove_volumes: options.remove_volumes,
                remove_links: options.remove_links,
                force: false,
            };
            self.teardown(&site, remove).await?;

            if options.remove_image {
                let image = site.run_params.image.reference();
                if let Err(err) = self
                    .runtime
                    .image_remove(&image, ImageRemoveOptions::default())
                    .await
                {
                    warn!(site_id, image = %image, error = %err, "Failed to remove image");
                }
            }

            self.sites.delete(site_id).await?;
        }
        self.locks.forget(site_id).await;

        info!(site_id, "Site deleted");
        Ok(())
    }

    pub async fn get_site(&self, site_id: SiteId) -> ManagerResult<Site> {
        self.find(site_id).await
    }

    pub async fn list_sites(&self, query: &ListSitesQuery) -> ManagerResult<SitePage> {
        let sites = self.sites.list().await?;
        Ok(query.apply(sites))
    }

    /// Rejects host ports already published by any container on the runtime.
    pub async fn check_port_conflicts(&self, ports: &[PortBinding]) -> ManagerResult<()> {
        let requested: BTreeSet<u16> = ports
            .iter()
            .map(|port| port.host)
            .filter(|host| *host != 0)
            .collect();
        if requested.is_empty() {
            return Ok(());
        }

        let values: Vec<String> = requested.iter().map(u16::to_string).collect();
        let holders = self
            .runtime
            .container_query_by_field("publish", &values)
            .await?;
        if holders.is_empty() {
            return Ok(());
        }

        let mut in_use: Vec<u16> = holders
            .iter()
            .flat_map(|holder| holder.public_ports.iter().copied())
            .filter(|port| requested.contains(port))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if in_use.is_empty() {
            in_use = requested.into_iter().collect();
        }

        warn!(ports = ?in_use, "Requested host ports are already published");
        Err(ValidationError::PortInUse { ports: in_use }.into())
    }

    async fn find(&self, site_id: SiteId) -> ManagerResult<Site> {
        self.sites
            .get(site_id)
            .await?
            .ok_or(ManagerError::SiteNotFound(site_id))
    }

    /// Stops and removes the site's container. The workload name also covers
    /// a container left created but unstarted by a failed attempt; the
    /// recorded id is only used for rows that never got a name.
    async fn teardown(&self, site: &Site, options: RemoveOptions) -> ManagerResult<()> {
        let target = match site.container_id.as_deref() {
            _ if !site.name.is_empty() => site.name.as_str(),
            Some(id) if !id.is_empty() => id,
            _ => return Ok(()),
        };

        let stop = StopOptions {
            timeout_secs: Some(STOP_TIMEOUT_SECS),
        };
        ignore_missing(self.runtime.container_stop(target, stop).await)?;
        ignore_missing(self.runtime.container_remove(target, options).await)?;

        debug!(site_id = site.id, container = %target, "Container removed");
        Ok(())
    }

    async fn submit(&self, site: &Site) -> ManagerResult<()> {
        let message = CreateMessage::new(&site.name, site.id, site.run_params.clone());
        let task_id = message.task_id;

        if let Err(err) = self.queue.enqueue(message).await {
            if let Err(report_err) = self
                .sites
                .update_site_status(site.id, SiteStatus::Error, &err.to_string())
                .await
            {
                warn!(site_id = site.id, error = %report_err, "Failed to record queue failure");
            }
            return Err(err.into());
        }

        debug!(site_id = site.id, %task_id, "Provisioning queued");
        Ok(())
    }
}
