use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use super::types::SiteId;

/// Per-site exclusion. The worker holds a site's guard for a whole
/// provisioning attempt; teardown paths take the same guard so a delete
/// cannot interleave with an in-flight creation.
#[derive(Debug, Clone, Default)]
pub struct SiteLocks {
    inner: Arc<Mutex<HashMap<SiteId, Arc<Mutex<()>>>>>,
}

impl SiteLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, site_id: SiteId) -> OwnedMutexGuard<()> {
        let site_lock = {
            let mut locks = self.inner.lock().await;
            locks.entry(site_id).or_default().clone()
        };
        site_lock.lock_owned().await
    }

    /// Drops the entry for a deleted site. A guard still held elsewhere stays
    /// valid.
    pub async fn forget(&self, site_id: SiteId) {
        self.inner.lock().await.remove(&site_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_site_is_exclusive() {
        let locks = SiteLocks::new();
        let guard = locks.lock(1).await;

        let contender = locks.clone();
        let waiting = tokio::spawn(async move {
            let _guard = contender.lock(1).await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn different_sites_do_not_block() {
        let locks = SiteLocks::new();
        let _first = locks.lock(1).await;
        let second = tokio::time::timeout(Duration::from_millis(100), locks.lock(2)).await;
        assert!(second.is_ok());
    }
}
