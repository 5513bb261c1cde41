use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::types::{Site, SiteId, SiteRepository, SiteRepositoryError, SiteRepositoryResult, SiteStatus};
use crate::tasks::types::RunParams;

/// Process-local site store.
#[derive(Debug)]
pub struct InMemorySiteRepository {
    sites: RwLock<HashMap<SiteId, Site>>,
    next_id: AtomicU64,
}

impl InMemorySiteRepository {
    pub fn new() -> Self {
        Self {
            sites: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    async fn modify<F>(&self, id: SiteId, apply: F) -> SiteRepositoryResult<()>
    where
        F: FnOnce(&mut Site) + Send,
    {
        let mut sites = self.sites.write().await;
        let site = sites.get_mut(&id).ok_or(SiteRepositoryError::NotFound(id))?;
        apply(site);
        Ok(())
    }
}

impl Default for InMemorySiteRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SiteRepository for InMemorySiteRepository {
    async fn insert(&self, title: &str, run_params: RunParams) -> SiteRepositoryResult<Site> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let site = Site {
            id,
            title: title.to_string(),
            name: String::new(),
            status: SiteStatus::Stopped,
            message: String::new(),
            container_id: None,
            run_params,
        };
        self.sites.write().await.insert(id, site.clone());
        Ok(site)
    }

    async fn set_name(&self, id: SiteId, name: &str) -> SiteRepositoryResult<()> {
        self.modify(id, |site| site.name = name.to_string()).await
    }

    async fn update_run_params(
        &self,
        id: SiteId,
        run_params: RunParams,
    ) -> SiteRepositoryResult<()> {
        self.modify(id, |site| site.run_params = run_params).await
    }

    async fn get(&self, id: SiteId) -> SiteRepositoryResult<Option<Site>> {
        Ok(self.sites.read().await.get(&id).cloned())
    }

    async fn list(&self) -> SiteRepositoryResult<Vec<Site>> {
        let mut sites: Vec<Site> = self.sites.read().await.values().cloned().collect();
        sites.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(sites)
    }

    async fn delete(&self, id: SiteId) -> SiteRepositoryResult<()> {
        self.sites
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(SiteRepositoryError::NotFound(id))
    }

    async fn update_site_status(
        &self,
        id: SiteId,
        status: SiteStatus,
        message: &str,
    ) -> SiteRepositoryResult<()> {
        self.modify(id, |site| {
            site.status = status;
            site.message = message.to_string();
        })
        .await
    }

    async fn update_site_container_info(
        &self,
        id: SiteId,
        container_id: Option<&str>,
    ) -> SiteRepositoryResult<()> {
        self.modify(id, |site| site.container_id = container_id.map(str::to_string))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::types::ImageRef;

    fn params() -> RunParams {
        RunParams {
            image: ImageRef::parse("nginx:latest"),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn insert_assigns_increasing_ids() {
        let repo = InMemorySiteRepository::new();
        let first = repo.insert("blog", params()).await.unwrap();
        let second = repo.insert("shop", params()).await.unwrap();

        assert!(second.id > first.id);
        assert_eq!(first.status, SiteStatus::Stopped);
        assert!(first.name.is_empty());
        assert_eq!(repo.list().await.unwrap()[0].id, second.id);
    }

    #[tokio::test]
    async fn writers_update_status_and_container() {
        let repo = InMemorySiteRepository::new();
        let site = repo.insert("blog", params()).await.unwrap();

        repo.update_site_status(site.id, SiteStatus::Error, "boom")
            .await
            .unwrap();
        repo.update_site_container_info(site.id, Some("abc123"))
            .await
            .unwrap();

        let site = repo.get(site.id).await.unwrap().unwrap();
        assert_eq!(site.status, SiteStatus::Error);
        assert_eq!(site.message, "boom");
        assert_eq!(site.container_id.as_deref(), Some("abc123"));

        repo.update_site_container_info(site.id, None).await.unwrap();
        let site = repo.get(site.id).await.unwrap().unwrap();
        assert_eq!(site.container_id, None);
    }

    #[tokio::test]
    async fn missing_rows_are_reported() {
        let repo = InMemorySiteRepository::new();
        let err = repo
            .update_site_status(42, SiteStatus::Success, "")
            .await
            .unwrap_err();
        assert!(matches!(err, SiteRepositoryError::NotFound(42)));
        assert!(repo.delete(42).await.is_err());
        assert!(repo.get(42).await.unwrap().is_none());
    }
}
