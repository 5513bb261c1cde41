//! Site records: the persistence seam, an in-memory store, the status
//! reporter used by the worker, and per-site locks.

pub mod locks;
pub mod memory;
pub mod reporter;
pub mod types;

pub use locks::SiteLocks;
pub use memory::InMemorySiteRepository;
pub use reporter::StatusReporter;
pub use types::{
    Site, SiteId, SiteRepository, SiteRepositoryError, SiteRepositoryResult, SiteStatus,
};
