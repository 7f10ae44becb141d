mod middleware;
mod products;

pub use middleware::log_responses;
pub use products::InvalidateResponse;

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    middleware::from_fn,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use sqlx::Error as SqlxError;

use crate::application::catalog::CatalogService;
use crate::application::error::ErrorReport;
use crate::infra::db::PostgresDocumentStore;

#[derive(Clone)]
pub struct HttpState {
    pub catalog: Arc<CatalogService>,
    /// Probed by `/health` when the catalog is database-backed.
    pub database: Option<PostgresDocumentStore>,
}

impl HttpState {
    pub fn new(catalog: Arc<CatalogService>) -> Self {
        Self {
            catalog,
            database: None,
        }
    }

    pub fn with_database(mut self, database: PostgresDocumentStore) -> Self {
        self.database = Some(database);
        self
    }
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/products", get(products::list_products))
        .route(
            "/api/v1/products/cache/invalidate",
            post(products::invalidate_products),
        )
        .with_state(state)
        .layer(from_fn(log_responses))
}

async fn health(State(state): State<HttpState>) -> Response {
    match state.database.as_ref() {
        Some(database) => db_health_response(database.health_check().await),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

fn db_health_response(result: Result<(), SqlxError>) -> Response {
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_error(
                "infra::http::db_health",
                StatusCode::SERVICE_UNAVAILABLE,
                &err,
            )
            .attach(&mut response);
            response
        }
    }
}
