use std::future::Future;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State as AxumState},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::types::{
    CreateSiteRequest, DeleteSiteOptions, ListSitesQuery, Manager, ManagerError,
    RedeploySiteRequest, SiteServer, ValidationError,
};
use crate::site::{SiteId, SiteRepositoryError};

impl IntoResponse for ManagerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ManagerError::Validation(ValidationError::PortInUse { .. }) => StatusCode::CONFLICT,
            ManagerError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ManagerError::SiteNotFound(_)
            | ManagerError::Repository(SiteRepositoryError::NotFound(_)) => StatusCode::NOT_FOUND,
            ManagerError::Runtime(_) => StatusCode::BAD_GATEWAY,
            ManagerError::Queue(_) => StatusCode::SERVICE_UNAVAILABLE,
            ManagerError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl SiteServer {
    pub fn new(manager: Arc<Manager>, address: &str, port: u16) -> Self {
        Self {
            manager,
            address: address.to_string(),
            port,
        }
    }

    async fn list_sites(
        AxumState(manager): AxumState<Arc<Manager>>,
        Query(query): Query<ListSitesQuery>,
    ) -> Response {
        match manager.list_sites(&query).await {
            Ok(page) => Json(page).into_response(),
            Err(err) => err.into_response(),
        }
    }

    async fn get_site(
        AxumState(manager): AxumState<Arc<Manager>>,
        Path(id): Path<SiteId>,
    ) -> Response {
        match manager.get_site(id).await {
            Ok(site) => Json(site).into_response(),
            Err(err) => err.into_response(),
        }
    }

    async fn create_site(
        AxumState(manager): AxumState<Arc<Manager>>,
        Json(request): Json<CreateSiteRequest>,
    ) -> Response {
        match manager.create_site(request).await {
            Ok(site) => {
                info!(site_id = site.id, "Site queued for provisioning");
                (StatusCode::ACCEPTED, Json(site)).into_response()
            }
            Err(err) => err.into_response(),
        }
    }

    async fn redeploy_site(
        AxumState(manager): AxumState<Arc<Manager>>,
        Path(id): Path<SiteId>,
        Json(request): Json<RedeploySiteRequest>,
    ) -> Response {
        match manager.redeploy_site(id, request.image).await {
            Ok(site) => (StatusCode::ACCEPTED, Json(site)).into_response(),
            Err(err) => err.into_response(),
        }
    }

    async fn delete_site(
        AxumState(manager): AxumState<Arc<Manager>>,
        Path(id): Path<SiteId>,
        Query(options): Query<DeleteSiteOptions>,
    ) -> Response {
        match manager.delete_site(id, options).await {
            Ok(()) => StatusCode::NO_CONTENT.into_response(),
            Err(err) => err.into_response(),
        }
    }

    pub fn router(manager: Arc<Manager>) -> Router {
        Router::new()
            .route(
                "/sites",
                get(SiteServer::list_sites).post(SiteServer::create_site),
            )
            .route(
                "/sites/{id}",
                get(SiteServer::get_site).delete(SiteServer::delete_site),
            )
            .route("/sites/{id}/redeploy", post(SiteServer::redeploy_site))
            .with_state(manager)
    }

    /// Serves until `shutdown` resolves. Dropping the server afterwards drops
    /// the manager and with it the queue sender, which lets the worker drain.
    pub async fn start_server<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let address = format!("{}:{}", self.address, self.port);
        let app = SiteServer::router(self.manager);

        let listener = TcpListener::bind(&address).await?;
        info!(%address, "Site server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Site server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::runtime::RuntimeError;
    use crate::worker::QueueError;
    use rstest::rstest;

    #[rstest]
    #[case(ValidationError::EmptyImage.into(), StatusCode::UNPROCESSABLE_ENTITY)]
    #[case(ValidationError::PortInUse { ports: vec![8080] }.into(), StatusCode::CONFLICT)]
    #[case(ManagerError::SiteNotFound(3), StatusCode::NOT_FOUND)]
    #[case(SiteRepositoryError::NotFound(3).into(), StatusCode::NOT_FOUND)]
    #[case(RuntimeError::Connection("connection refused".to_string()).into(), StatusCode::BAD_GATEWAY)]
    #[case(QueueError::Closed(uuid::Uuid::nil()).into(), StatusCode::SERVICE_UNAVAILABLE)]
    fn maps_errors_to_status(#[case] err: ManagerError, #[case] expected: StatusCode) {
        assert_eq!(err.into_response().status(), expected);
    }

    #[test]
    fn port_conflict_message_lists_ports() {
        let err: ManagerError = ValidationError::PortInUse {
            ports: vec![80, 443],
        }
        .into();
        assert_eq!(err.to_string(), "host ports already in use: 80, 443");
    }
}
