use axum::{
    Json,
    extract::{RawQuery, State},
};
use serde::Serialize;

use crate::application::catalog::ProductPage;
use crate::application::error::AppError;

use super::HttpState;

/// `GET /api/v1/products?<filters>`
///
/// The raw query string is compiled as-is so bracketed suffixes such as
/// `price[gte]=20` reach the allow-list parser untouched.
pub async fn list_products(
    State(state): State<HttpState>,
    RawQuery(query): RawQuery,
) -> Result<Json<ProductPage>, AppError> {
    let page = state.catalog.search(query.as_deref().unwrap_or("")).await?;
    Ok(Json(page))
}

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub removed: usize,
}

/// `POST /api/v1/products/cache/invalidate`
pub async fn invalidate_products(State(state): State<HttpState>) -> Json<InvalidateResponse> {
    let removed = state.catalog.invalidate_all().await;
    Json(InvalidateResponse { removed })
}
