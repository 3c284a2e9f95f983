//! Cache effectiveness integration tests.
//!
//! Tests verify:
//! - Repeated tile requests are served without touching the source
//! - Concurrent identical requests share one dataset open and one render
//! - Rendering parameters are part of the cache key

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, StatusCode};
use bytes::Bytes;

use raster_tileserver::raster::DatasetRegistry;
use raster_tileserver::server::{create_router_with_state, AppState};
use raster_tileserver::tile::{
    RenderedTile, TileCache, TileCacheOptions, TileRequest, TileService, TileServiceOptions,
};
use raster_tileserver::render::RenderParams;
use raster_tileserver::RouterConfig;

use super::test_utils::{body_bytes, fixture_source, get, world_float_raster, CountingSource};

// =============================================================================
// Tile Cache Effectiveness
// =============================================================================

#[tokio::test]
async fn test_repeated_tile_does_not_read_source() {
    let source = CountingSource::new("world.tif", world_float_raster());
    let reads = source.reads();
    let service = Arc::new(TileService::new(DatasetRegistry::new(source)));
    let router = create_router_with_state(
        AppState::with_shared_service(Arc::clone(&service)),
        &RouterConfig::new().with_tracing(false),
    );

    let uri = "/api/tiles/1/1/0.png?filename=world.tif&vmin=0&vmax=100";
    let first = get(&router, uri).await;
    assert_eq!(first.status(), StatusCode::OK);
    let after_first = reads.load(Ordering::SeqCst);
    assert!(after_first > 0);

    let second = get(&router, uri).await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(reads.load(Ordering::SeqCst), after_first);
    assert_eq!(body_bytes(first).await, body_bytes(second).await);
    assert_eq!(service.cache().len(), 1);
}

#[tokio::test]
async fn test_concurrent_identical_requests_share_one_render() {
    let service = Arc::new(TileService::new(DatasetRegistry::new(fixture_source())));
    let router = create_router_with_state(
        AppState::with_shared_service(Arc::clone(&service)),
        &RouterConfig::new().with_tracing(false),
    );

    let uri = "/api/tiles/0/0/0.png?filename=world.tif&vmin=0&vmax=100";
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let router = router.clone();
            tokio::spawn(async move {
                let response = get(&router, uri).await;
                assert_eq!(response.status(), StatusCode::OK);
                body_bytes(response).await
            })
        })
        .collect();

    let mut bodies = Vec::new();
    for handle in handles {
        bodies.push(handle.await.unwrap());
    }
    assert!(bodies.windows(2).all(|pair| pair[0] == pair[1]));

    assert_eq!(service.registry().source().opens(), 1);
    let stats = service.cache().stats();
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.in_flight, 0);
}

#[tokio::test]
async fn test_stretch_parameters_are_part_of_the_cache_key() {
    let service = Arc::new(TileService::new(DatasetRegistry::new(fixture_source())));
    let router = create_router_with_state(
        AppState::with_shared_service(Arc::clone(&service)),
        &RouterConfig::new().with_tracing(false),
    );

    let a = get(&router, "/api/tiles/0/0/0.png?filename=world.tif&vmin=0&vmax=100").await;
    let b = get(&router, "/api/tiles/0/0/0.png?filename=world.tif&vmin=0&vmax=50").await;
    let etag_a = a.headers()[header::ETAG].clone();
    let etag_b = b.headers()[header::ETAG].clone();
    assert_ne!(etag_a, etag_b);
    assert_ne!(body_bytes(a).await, body_bytes(b).await);
    assert_eq!(service.cache().len(), 2);

    // Same parameters in another order share the entry
    let c = get(&router, "/api/tiles/0/0/0.png?vmax=100&filename=world.tif&vmin=0").await;
    assert_eq!(c.headers()[header::ETAG], etag_a);
    assert_eq!(service.cache().len(), 2);
}

#[tokio::test]
async fn test_fingerprint_covers_request_fields() {
    let base = TileRequest::new("world.tif", 3, 1, 2);
    let same = TileRequest::new("world.tif", 3, 1, 2);
    assert_eq!(base.fingerprint(), same.fingerprint());

    let others = [
        TileRequest::new("other.tif", 3, 1, 2),
        TileRequest::new("world.tif", 4, 1, 2),
        TileRequest::new("world.tif", 3, 2, 2),
        TileRequest::new("world.tif", 3, 1, 3),
        base.clone().with_params(RenderParams {
            colormap: Some("viridis".into()),
            ..RenderParams::default()
        }),
        base.clone().with_params(RenderParams {
            vmin: vec![0.0],
            vmax: vec![1.0],
            ..RenderParams::default()
        }),
    ];
    for other in &others {
        assert_ne!(base.fingerprint(), other.fingerprint(), "{:?}", other);
    }
}

#[tokio::test]
async fn test_service_tile_cache_is_bounded() {
    let service = TileService::with_options(
        Arc::new(DatasetRegistry::new(fixture_source())),
        TileCacheOptions {
            max_bytes: 64 * 1024 * 1024,
            max_entries: 2,
            failure_cooldown: Duration::ZERO,
        },
        TileServiceOptions::default(),
    );

    for x in 0..2 {
        for y in 0..2 {
            service
                .get_tile(TileRequest::new("rgb.tif", 1, x, y))
                .await
                .unwrap();
        }
    }
    assert_eq!(service.cache().len(), 2);
    assert!(service.cache().contains(&TileRequest::new("rgb.tif", 1, 1, 1).fingerprint()));
    assert!(!service.cache().contains(&TileRequest::new("rgb.tif", 1, 0, 0).fingerprint()));
}

#[test]
fn test_tile_cache_lru_order() {
    let cache = TileCache::with_options(TileCacheOptions {
        max_bytes: 1024,
        max_entries: 2,
        failure_cooldown: Duration::ZERO,
    });
    let tile = |key: &str| RenderedTile::new(Bytes::from_static(b"tile"), "image/png", key);

    cache.insert(tile("a"));
    cache.insert(tile("b"));
    assert!(cache.get("a").unwrap().is_some());
    cache.insert(tile("c"));

    assert!(cache.contains("a"));
    assert!(!cache.contains("b"));
    assert!(cache.contains("c"));
    assert_eq!(cache.size(), 8);
}
