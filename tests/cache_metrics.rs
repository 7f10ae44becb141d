use std::collections::HashSet;
use std::num::NonZeroU32;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use metrics_util::debugging::{DebuggingRecorder, Snapshotter};
use serde_json::json;
use serial_test::serial;
use shopfront::application::catalog::CatalogService;
use shopfront::application::compiler::QueryCompiler;
use shopfront::cache::{CacheConfig, CacheFront, MemoryBackend, Namespace, RedisConfig};
use shopfront::domain::schema::CollectionSchema;
use shopfront::infra::memory::MemoryDocumentStore;
use shopfront::infra::redis::RedisBackend;

fn snapshotter() -> &'static Snapshotter {
    static SNAPSHOTTER: OnceLock<Snapshotter> = OnceLock::new();
    SNAPSHOTTER.get_or_init(|| {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        recorder
            .install()
            .expect("debug metrics recorder should install in this test process");
        snapshotter
    })
}

fn metric_names(snapshotter: &Snapshotter) -> HashSet<String> {
    snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect()
}

fn catalog(cache: CacheFront) -> CatalogService {
    let store = MemoryDocumentStore::new(
        CollectionSchema::products(),
        vec![json!({"name": "Court Shoe", "category": "shoes", "price": 40})],
    );
    CatalogService::new(
        Arc::new(store),
        Arc::new(cache),
        QueryCompiler::new(CollectionSchema::products()),
        Namespace::new("products").expect("valid namespace"),
        NonZeroU32::new(8).expect("non-zero"),
        Duration::from_secs(60),
    )
}

#[tokio::test]
#[serial]
async fn catalog_paths_emit_expected_metric_keys() {
    let snapshotter = snapshotter();
    let catalog = catalog(CacheFront::new(Arc::new(MemoryBackend::new(
        &CacheConfig::default(),
    ))));

    catalog.search("category=shoes").await.expect("miss");
    catalog.search("category=shoes").await.expect("hit");
    assert_eq!(catalog.invalidate_all().await, 1);
    assert!(catalog.search("price[ne]=1").await.is_err());

    let names = metric_names(snapshotter);
    for expected in [
        "shopfront_cache_hit_total",
        "shopfront_cache_miss_total",
        "shopfront_cache_invalidated_total",
        "shopfront_cache_producer_ms",
        "shopfront_compile_rejected_total",
    ] {
        assert!(names.contains(expected), "missing metric `{expected}`");
    }
}

#[tokio::test]
#[serial]
async fn unreachable_backend_is_counted() {
    let snapshotter = snapshotter();
    let config = RedisConfig {
        port: 1,
        connect_timeout: Duration::from_millis(200),
        operation_timeout: Duration::from_millis(200),
        ..RedisConfig::default()
    };
    let backend = RedisBackend::new(&config).expect("client builds without connecting");
    let catalog = catalog(CacheFront::new(Arc::new(backend)));

    let page = catalog.search("category=shoes").await.expect("served by store");
    assert_eq!(page.total_count, 1);

    let names = metric_names(snapshotter);
    assert!(names.contains("shopfront_cache_unavailable_total"));
}
