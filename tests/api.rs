//! Catalog HTTP surface driven through the router without a listener.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use shopfront::application::catalog::CatalogService;
use shopfront::application::compiler::QueryCompiler;
use shopfront::application::repos::{DocumentStore, StoreError};
use shopfront::cache::{CacheConfig, CacheFront, DisabledBackend, MemoryBackend, Namespace};
use shopfront::domain::query::QueryDescriptor;
use shopfront::domain::schema::CollectionSchema;
use shopfront::infra::http::{HttpState, build_router};
use shopfront::infra::memory::MemoryDocumentStore;
use tower::ServiceExt;

struct CountingStore {
    inner: MemoryDocumentStore,
    finds: AtomicUsize,
}

#[async_trait]
impl DocumentStore for CountingStore {
    async fn find(&self, query: &QueryDescriptor) -> Result<Vec<Value>, StoreError> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        self.inner.find(query).await
    }

    async fn count(&self, query: &QueryDescriptor) -> Result<u64, StoreError> {
        self.inner.count(query).await
    }
}

struct DownStore;

#[async_trait]
impl DocumentStore for DownStore {
    async fn find(&self, _query: &QueryDescriptor) -> Result<Vec<Value>, StoreError> {
        Err(StoreError::unavailable("connection refused"))
    }

    async fn count(&self, _query: &QueryDescriptor) -> Result<u64, StoreError> {
        Err(StoreError::unavailable("connection refused"))
    }
}

fn catalog_documents() -> Vec<Value> {
    vec![
        json!({"name": "Trail Running Shoe", "description": "grippy outsole", "category": "shoes", "price": 80, "ratings": 4.5, "stock": 3}),
        json!({"name": "Road Running Shoe", "description": "light and fast", "category": "shoes", "price": 120, "ratings": 4.0, "stock": 0}),
        json!({"name": "Rain Jacket", "description": "waterproof shell", "category": "outerwear", "price": 60, "ratings": 3.5, "stock": 9}),
        json!({"name": "Court Shoe", "description": "tennis", "category": "shoes", "price": 40, "ratings": 4.8, "stock": 1}),
    ]
}

fn router_with(store: Arc<dyn DocumentStore>, cache: CacheFront) -> Router {
    let catalog = CatalogService::new(
        store,
        Arc::new(cache),
        QueryCompiler::new(CollectionSchema::products()),
        Namespace::new("products").expect("valid namespace"),
        NonZeroU32::new(8).expect("non-zero"),
        Duration::from_secs(60),
    );
    build_router(HttpState::new(Arc::new(catalog)))
}

fn memory_cache() -> CacheFront {
    CacheFront::new(Arc::new(MemoryBackend::new(&CacheConfig::default())))
}

async fn send(router: &Router, method: Method, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build");
    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body should collect")
        .to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, body)
}

#[tokio::test]
async fn filters_and_pagination_reach_the_store() {
    let store = Arc::new(MemoryDocumentStore::new(
        CollectionSchema::products(),
        catalog_documents(),
    ));
    let router = router_with(store, memory_cache());

    let (status, body) = send(
        &router,
        Method::GET,
        "/api/v1/products?category=shoes&price[gte]=50&price[lte]=100",
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_count"], json!(1));
    assert_eq!(body["page"], json!(1));
    assert_eq!(body["page_size"], json!(8));
    assert_eq!(body["items"][0]["name"], json!("Trail Running Shoe"));
}

#[tokio::test]
async fn keyword_search_returns_scored_items() {
    let store = Arc::new(MemoryDocumentStore::new(
        CollectionSchema::products(),
        catalog_documents(),
    ));
    let router = router_with(store, memory_cache());

    let (status, body) = send(&router, Method::GET, "/api/v1/products?keyword=running+shoe").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_count"], json!(3));
    let first = &body["items"][0];
    assert!(first["score"].as_u64().is_some_and(|score| score >= 2));
}

#[tokio::test]
async fn unknown_operator_is_a_client_fault() {
    let store = Arc::new(MemoryDocumentStore::new(
        CollectionSchema::products(),
        catalog_documents(),
    ));
    let router = router_with(store, memory_cache());

    let (status, body) = send(&router, Method::GET, "/api/v1/products?price[ne]=5").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("unsupported_operator"));
    assert!(
        body["error"]["hint"]
            .as_str()
            .is_some_and(|hint| hint.contains("`ne`"))
    );
}

#[tokio::test]
async fn invalid_page_and_unknown_field_are_rejected() {
    let store = Arc::new(MemoryDocumentStore::new(
        CollectionSchema::products(),
        catalog_documents(),
    ));
    let router = router_with(store, memory_cache());

    for (uri, code) in [
        ("/api/v1/products?page=abc", "malformed_parameter"),
        ("/api/v1/products?page=0", "malformed_parameter"),
        ("/api/v1/products?%24where=1", "unknown_field"),
        ("/api/v1/products?price=cheap", "invalid_value"),
        ("/api/v1/products?category[gt]=a", "unsupported_operator"),
    ] {
        let (status, body) = send(&router, Method::GET, uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body["error"]["code"], json!(code), "{uri}");
    }
}

#[tokio::test]
async fn empty_result_is_success() {
    let store = Arc::new(MemoryDocumentStore::new(
        CollectionSchema::products(),
        catalog_documents(),
    ));
    let router = router_with(store, memory_cache());

    let (status, body) = send(&router, Method::GET, "/api/v1/products?category=hats").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"], json!([]));
    assert_eq!(body["total_count"], json!(0));
}

#[tokio::test]
async fn store_outage_is_a_server_fault() {
    let router = router_with(Arc::new(DownStore), memory_cache());

    let (status, body) = send(&router, Method::GET, "/api/v1/products?category=shoes").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], json!("store_unavailable"));
    assert!(body["error"].get("hint").is_none());
}

#[tokio::test]
async fn repeated_query_is_served_from_cache_until_invalidated() {
    let store = Arc::new(CountingStore {
        inner: MemoryDocumentStore::new(CollectionSchema::products(), catalog_documents()),
        finds: AtomicUsize::new(0),
    });
    let router = router_with(store.clone(), memory_cache());

    // Key order differs; the compiled query and cache key do not.
    let (_, first) = send(&router, Method::GET, "/api/v1/products?price[lte]=100&category=shoes").await;
    let (_, second) = send(&router, Method::GET, "/api/v1/products?category=shoes&price[lte]=100").await;
    assert_eq!(first, second);
    assert_eq!(store.finds.load(Ordering::SeqCst), 1);

    let (status, body) = send(&router, Method::POST, "/api/v1/products/cache/invalidate").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], json!(1));

    send(&router, Method::GET, "/api/v1/products?category=shoes&price[lte]=100").await;
    assert_eq!(store.finds.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn disabled_cache_always_computes() {
    let store = Arc::new(CountingStore {
        inner: MemoryDocumentStore::new(CollectionSchema::products(), catalog_documents()),
        finds: AtomicUsize::new(0),
    });
    let router = router_with(store.clone(), CacheFront::new(Arc::new(DisabledBackend)));

    for _ in 0..3 {
        let (status, _) = send(&router, Method::GET, "/api/v1/products?category=shoes").await;
        assert_eq!(status, StatusCode::OK);
    }
    assert_eq!(store.finds.load(Ordering::SeqCst), 3);

    let (_, body) = send(&router, Method::POST, "/api/v1/products/cache/invalidate").await;
    assert_eq!(body["removed"], json!(0));
}

#[tokio::test]
async fn health_without_database_is_no_content() {
    let router = router_with(
        Arc::new(MemoryDocumentStore::empty(CollectionSchema::products())),
        memory_cache(),
    );
    let (status, body) = send(&router, Method::GET, "/health").await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);
}
