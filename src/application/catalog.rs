//! Catalog queries served through the cache.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::application::compiler::QueryCompiler;
use crate::application::error::AppError;
use crate::application::repos::{DocumentStore, StoreError};
use crate::cache::{CacheFront, Namespace};
use crate::domain::error::ValidationError;
use crate::domain::filter::FilterRequest;
use crate::domain::query::QueryDescriptor;

/// One page of matching documents plus the total match count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductPage {
    pub items: Vec<Value>,
    pub total_count: u64,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn DocumentStore>,
    cache: Arc<CacheFront>,
    compiler: QueryCompiler,
    namespace: Namespace,
    page_size: NonZeroU32,
    ttl: Duration,
}

impl CatalogService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        cache: Arc<CacheFront>,
        compiler: QueryCompiler,
        namespace: Namespace,
        page_size: NonZeroU32,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            compiler,
            namespace,
            page_size,
            ttl,
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn page_size(&self) -> NonZeroU32 {
        self.page_size
    }

    pub fn compile_filter_request(
        &self,
        request: &FilterRequest,
    ) -> Result<QueryDescriptor, ValidationError> {
        self.compiler.compile(request, self.page_size)
    }

    pub fn compile_query_string(&self, query: &str) -> Result<QueryDescriptor, ValidationError> {
        let request = FilterRequest::from_query_str(query)?;
        self.compile_filter_request(&request)
    }

    pub fn cache_key(&self, descriptor: &QueryDescriptor) -> String {
        self.namespace.key_for(descriptor)
    }

    /// Run `descriptor` against the store, reading through the cache.
    pub async fn fetch_page(&self, descriptor: &QueryDescriptor) -> Result<ProductPage, StoreError> {
        let key = self.cache_key(descriptor);
        self.cache
            .get_or_compute(&key, self.ttl, || async {
                let (items, total_count) =
                    tokio::try_join!(self.store.find(descriptor), self.store.count(descriptor))?;
                debug!(
                    namespace = %self.namespace,
                    returned = items.len(),
                    total_count,
                    "Catalog page computed from store"
                );
                Ok::<_, StoreError>(ProductPage {
                    items,
                    total_count,
                    page: descriptor.page().get(),
                    page_size: descriptor.page_size().get(),
                })
            })
            .await
    }

    /// Compile a raw query string and fetch its page.
    pub async fn search(&self, query: &str) -> Result<ProductPage, AppError> {
        let descriptor = self.compile_query_string(query)?;
        Ok(self.fetch_page(&descriptor).await?)
    }

    /// Drop every cached query of this collection. Called by the write path
    /// after documents change.
    pub async fn invalidate_all(&self) -> usize {
        let removed = self.cache.invalidate_prefix(&self.namespace.prefix()).await;
        info!(namespace = %self.namespace, removed, "Catalog cache invalidated");
        removed
    }

    pub async fn invalidate_query(&self, descriptor: &QueryDescriptor) -> bool {
        self.cache.invalidate(&self.cache_key(descriptor)).await
    }
}
