pub mod api;
pub mod manager;
pub mod types;

pub use manager::workload_name;
pub use types::{
    CreateSiteRequest, DEFAULT_PAGE_SIZE, DeleteSiteOptions, ListSitesQuery, Manager,
    ManagerError, ManagerResult, RedeploySiteRequest, SitePage, SiteServer, ValidationError,
};
