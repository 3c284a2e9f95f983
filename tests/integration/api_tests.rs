//! HTTP API integration tests.
//!
//! Every endpoint is driven through the full router with `tower::oneshot`
//! against in-memory GeoTIFF fixtures.

use axum::http::{header, Request, StatusCode};
use axum::body::Body;
use axum::Router;
use tower::ServiceExt;

use raster_tileserver::io::MemoryReader;
use raster_tileserver::raster::{DatasetRegistry, RasterDataset};
use raster_tileserver::tile::TileService;
use raster_tileserver::{create_router, RouterConfig};

use super::test_utils::{body_bytes, body_json, decode_rgba, fixture_source, get};

fn router() -> Router {
    let service = TileService::new(DatasetRegistry::new(fixture_source()));
    create_router(service, RouterConfig::new().with_tracing(false))
}

fn approx(value: &serde_json::Value, expected: f64) -> bool {
    value
        .as_f64()
        .is_some_and(|v| (v - expected).abs() < 1e-6)
}

async fn assert_error(router: &Router, uri: &str, status: StatusCode, kind: &str) {
    let response = get(router, uri).await;
    assert_eq!(response.status(), status, "{}", uri);
    let json = body_json(response).await;
    assert_eq!(json["error"], kind, "{}", uri);
    assert_eq!(json["status"], status.as_u16());
    assert!(json["message"].as_str().is_some_and(|m| !m.is_empty()));
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let router = router();
    let response = get(&router, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert!(json["version"].is_string());
}

// =============================================================================
// Tiles
// =============================================================================

#[tokio::test]
async fn test_float_tile_nodata_transparent_and_linear_stretch() {
    let router = router();
    let response = get(&router, "/api/tiles/0/0/0.png?filename=world.tif&vmin=0&vmax=100").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");

    let image = decode_rgba(&body_bytes(response).await);
    assert_eq!(image.dimensions(), (256, 256));

    // Left half is nodata
    for (x, y) in [(10, 10), (64, 128), (120, 250)] {
        assert_eq!(image.get_pixel(x, y).0[3], 0, "pixel ({}, {})", x, y);
    }
    // 50 on a 0..100 stretch
    for (x, y) in [(140, 10), (192, 128), (250, 250)] {
        assert_eq!(image.get_pixel(x, y).0, [128, 128, 128, 255], "pixel ({}, {})", x, y);
    }
}

#[tokio::test]
async fn test_stretch_bounds_change_output() {
    let router = router();
    let response = get(&router, "/api/tiles/0/0/0.png?filename=world.tif&vmin=0&vmax=50").await;
    let image = decode_rgba(&body_bytes(response).await);
    assert_eq!(image.get_pixel(192, 128).0, [255, 255, 255, 255]);

    let response = get(&router, "/api/tiles/0/0/0.png?filename=world.tif&vmin=50&vmax=150").await;
    let image = decode_rgba(&body_bytes(response).await);
    assert_eq!(image.get_pixel(192, 128).0, [0, 0, 0, 255]);
}

#[tokio::test]
async fn test_rgb_tile_as_jpeg() {
    let router = router();
    let response = get(&router, "/api/tiles/0/0/0.jpg?filename=rgb.tif").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
    assert!(response.headers().contains_key(header::ETAG));
    assert!(response.headers()[header::CACHE_CONTROL]
        .to_str()
        .unwrap()
        .contains("max-age=3600"));

    let bytes = body_bytes(response).await;
    assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    assert_eq!(decode_rgba(&bytes).dimensions(), (256, 256));
}

#[tokio::test]
async fn test_tile_without_extension_is_png() {
    let router = router();
    let response = get(&router, "/api/tiles/0/0/0?filename=rgb.tif").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
}

#[tokio::test]
async fn test_tile_size_parameter() {
    let router = router();
    let response = get(&router, "/api/tiles/0/0/0.png?filename=rgb.tif&tile_size=512").await;
    assert_eq!(response.status(), StatusCode::OK);
    let image = decode_rgba(&body_bytes(response).await);
    assert_eq!(image.dimensions(), (512, 512));
}

#[tokio::test]
async fn test_tile_outside_extent_is_transparent() {
    let router = router();
    // z=3 x=0 covers lon -180..-135, far from the raster
    let response = get(&router, "/api/tiles/3/0/0.png?filename=geo.tif").await;
    assert_eq!(response.status(), StatusCode::OK);

    let image = decode_rgba(&body_bytes(response).await);
    assert_eq!(image.dimensions(), (256, 256));
    assert!(image.pixels().all(|p| p.0[3] == 0));
}

#[tokio::test]
async fn test_tile_errors() {
    let router = router();
    assert_error(
        &router,
        "/api/tiles/0/0/0.png",
        StatusCode::BAD_REQUEST,
        "invalid_parameter",
    )
    .await;
    assert_error(
        &router,
        "/api/tiles/0/0/0.png?filename=missing.tif",
        StatusCode::NOT_FOUND,
        "not_found",
    )
    .await;
    assert_error(
        &router,
        "/api/tiles/1/5/0.png?filename=rgb.tif",
        StatusCode::NOT_FOUND,
        "tile_out_of_range",
    )
    .await;
    assert_error(
        &router,
        "/api/tiles/0/0/0.png?filename=geo.tif&band=5",
        StatusCode::BAD_REQUEST,
        "invalid_parameter",
    )
    .await;
    assert_error(
        &router,
        "/api/tiles/0/0/0.png?filename=geo.tif&vmin=abc",
        StatusCode::BAD_REQUEST,
        "invalid_parameter",
    )
    .await;
    assert_error(
        &router,
        "/api/tiles/0/0/0.gif?filename=geo.tif",
        StatusCode::BAD_REQUEST,
        "invalid_parameter",
    )
    .await;
    assert_error(
        &router,
        "/api/tiles/0/0/0.png?filename=geo.tif&colormap=nope",
        StatusCode::BAD_REQUEST,
        "invalid_parameter",
    )
    .await;
}

#[tokio::test]
async fn test_unreadable_raster_is_server_error() {
    let router = router();
    assert_error(
        &router,
        "/api/tiles/0/0/0.png?filename=not-a-tiff.tif",
        StatusCode::INTERNAL_SERVER_ERROR,
        "source_error",
    )
    .await;
}

#[tokio::test]
async fn test_if_none_match_returns_not_modified() {
    let router = router();
    let uri = "/api/tiles/0/0/0.png?filename=rgb.tif";
    let response = get(&router, uri).await;
    let etag = response.headers()[header::ETAG].to_str().unwrap().to_string();
    assert!(etag.starts_with('"') && etag.ends_with('"'));

    let request = Request::builder()
        .uri(uri)
        .header(header::IF_NONE_MATCH, &etag)
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(response.headers()[header::ETAG], etag.as_str());
    assert!(body_bytes(response).await.is_empty());

    let request = Request::builder()
        .uri(uri)
        .header(header::IF_NONE_MATCH, "\"something-else\"")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_debug_tile() {
    let router = router();
    let response = get(&router, "/api/tiles/debug/3/2/1.png").await;
    assert_eq!(response.status(), StatusCode::OK);
    let image = decode_rgba(&body_bytes(response).await);
    assert_eq!(image.dimensions(), (256, 256));
    assert!(image.pixels().any(|p| p.0[3] > 0));

    assert_error(
        &router,
        "/api/tiles/debug/3/2/1.jpg",
        StatusCode::BAD_REQUEST,
        "invalid_parameter",
    )
    .await;
    assert_error(
        &router,
        "/api/tiles/debug/1/2/0.png",
        StatusCode::NOT_FOUND,
        "tile_out_of_range",
    )
    .await;
}

// =============================================================================
// Dataset Queries
// =============================================================================

#[tokio::test]
async fn test_metadata() {
    let router = router();
    let response = get(&router, "/api/metadata?filename=geo.tif").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["identifier"], "geo.tif");
    assert_eq!(json["width"], 100);
    assert_eq!(json["height"], 100);
    assert_eq!(json["band_count"], 1);
    assert_eq!(json["has_palette"], false);
    assert!(approx(&json["bounds_wgs84"]["left"], 10.0));
    assert!(approx(&json["bounds_wgs84"]["top"], 50.0));
    assert!(approx(&json["center"][0], 15.0));
    assert!(approx(&json["center"][1], 45.0));
    assert!(json["max_zoom"].as_u64().is_some());
    assert!(json["min_zoom"].as_u64() <= json["max_zoom"].as_u64());

    let stats = &json["statistics"][0];
    assert!(approx(&stats["min"], 0.0));
    assert!(approx(&stats["max"], 99.0));
}

#[tokio::test]
async fn test_metadata_requires_filename() {
    let router = router();
    assert_error(&router, "/api/metadata", StatusCode::BAD_REQUEST, "invalid_parameter").await;
    assert_error(
        &router,
        "/api/metadata?filename=missing.tif",
        StatusCode::NOT_FOUND,
        "not_found",
    )
    .await;
}

#[tokio::test]
async fn test_bounds_in_wgs84_and_mercator() {
    let router = router();
    let json = body_json(get(&router, "/api/bounds?filename=geo.tif").await).await;
    assert_eq!(json["crs"], "EPSG:4326");
    let expected = [10.0, 40.0, 20.0, 50.0];
    for (i, e) in expected.iter().enumerate() {
        assert!(approx(&json["bounds"][i], *e), "{:?}", json["bounds"]);
    }

    let json = body_json(get(&router, "/api/bounds?filename=geo.tif&units=EPSG:3857").await).await;
    assert_eq!(json["crs"], "EPSG:3857");
    let left = json["bounds"][0].as_f64().unwrap();
    assert!((left - 1_113_194.9).abs() < 1.0, "left = {}", left);

    assert_error(
        &router,
        "/api/bounds?filename=geo.tif&units=EPSG:999999",
        StatusCode::BAD_REQUEST,
        "invalid_parameter",
    )
    .await;
}

#[tokio::test]
async fn test_center() {
    let router = router();
    let json = body_json(get(&router, "/api/center?filename=geo.tif").await).await;
    assert!(approx(&json["center"][0], 15.0));
    assert!(approx(&json["center"][1], 45.0));
    assert!(json["zoom"].as_u64().is_some());
}

#[tokio::test]
async fn test_histogram() {
    let router = router();
    let response = get(&router, "/api/histogram?filename=geo.tif&bins=4").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let counts = json["counts"].as_array().unwrap();
    let edges = json["edges"].as_array().unwrap();
    assert_eq!(counts.len(), 4);
    assert_eq!(edges.len(), 5);
    assert!(approx(&edges[0], 0.0));
    assert!(approx(&edges[4], 99.0));
    let sum: f64 = counts.iter().filter_map(|c| c.as_f64()).sum();
    assert_eq!(sum as u64, json["total"].as_u64().unwrap());
    assert_eq!(json["total"], 100 * 100);

    assert_error(
        &router,
        "/api/histogram?filename=geo.tif&range=5",
        StatusCode::BAD_REQUEST,
        "invalid_parameter",
    )
    .await;
    assert_error(
        &router,
        "/api/histogram?filename=geo.tif&bins=0",
        StatusCode::BAD_REQUEST,
        "invalid_parameter",
    )
    .await;
}

#[tokio::test]
async fn test_pixel_query() {
    let router = router();
    let json = body_json(get(&router, "/api/pixel?filename=geo.tif&x=42&y=7").await).await;
    assert_eq!(json["col"], 42);
    assert_eq!(json["row"], 7);
    assert!(approx(&json["values"][0], 42.0));

    let json = body_json(
        get(
            &router,
            "/api/pixel?filename=geo.tif&x=15.05&y=45.05&units=EPSG:4326",
        )
        .await,
    )
    .await;
    assert_eq!(json["col"], 50);
    assert_eq!(json["row"], 49);
    assert!(approx(&json["values"][0], 50.0));

    assert_error(
        &router,
        "/api/pixel?filename=geo.tif&x=150&y=7",
        StatusCode::BAD_REQUEST,
        "invalid_parameter",
    )
    .await;
}

#[tokio::test]
async fn test_pixel_query_reports_nodata_as_null() {
    let router = router();
    let json = body_json(get(&router, "/api/pixel?filename=world.tif&x=10&y=10").await).await;
    assert!(json["values"][0].is_null());

    let json = body_json(get(&router, "/api/pixel?filename=world.tif&x=300&y=10").await).await;
    assert!(approx(&json["values"][0], 50.0));
}

// =============================================================================
// Regions and Previews
// =============================================================================

#[tokio::test]
async fn test_pixel_region_as_geotiff() {
    let router = router();
    let response = get(
        &router,
        "/api/pixel/region.tif?filename=geo.tif&left=10&top=20&right=30&bottom=50",
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/tiff");
    assert!(response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .contains("geo_region.tif"));

    let bytes = body_bytes(response).await;
    let region = RasterDataset::open(MemoryReader::new(bytes, "region.tif"), 16)
        .await
        .unwrap();
    assert_eq!(region.info().width, 20);
    assert_eq!(region.info().height, 30);
    assert!(region.georeference().is_some());

    let values = region.pixel_values(0.0, 0.0).await.unwrap().unwrap();
    assert_eq!(values, vec![10.0]);
    let values = region.pixel_values(19.0, 29.0).await.unwrap().unwrap();
    assert_eq!(values, vec![29.0]);

    let bounds = region.info().bounds;
    assert!((bounds.left - 11.0).abs() < 1e-6);
    assert!((bounds.top - 48.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_world_region_as_png() {
    let router = router();
    let response = get(
        &router,
        "/api/region.png?filename=geo.tif&left=12&bottom=42&right=14&top=44",
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");

    let image = decode_rgba(&body_bytes(response).await);
    let (w, h) = image.dimensions();
    assert!((19..=21).contains(&w), "width {}", w);
    assert!((19..=21).contains(&h), "height {}", h);
}

#[tokio::test]
async fn test_region_errors() {
    let router = router();
    assert_error(
        &router,
        "/api/region.png?filename=geo.tif&left=12&bottom=42&right=14",
        StatusCode::BAD_REQUEST,
        "invalid_parameter",
    )
    .await;
    assert_error(
        &router,
        "/api/pixel/region.png?filename=geo.tif&left=500&top=500&right=600&bottom=600",
        StatusCode::BAD_REQUEST,
        "invalid_parameter",
    )
    .await;
}

#[tokio::test]
async fn test_thumbnail() {
    let router = router();
    let response = get(&router, "/api/thumbnail.png?filename=geo.tif&max_size=50").await;
    assert_eq!(response.status(), StatusCode::OK);
    let image = decode_rgba(&body_bytes(response).await);
    let (w, h) = image.dimensions();
    assert_eq!(w.max(h), 50);

    let response = get(&router, "/api/thumbnail.jpg?filename=rgb.tif").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");

    assert_error(
        &router,
        "/api/thumbnail.png?filename=geo.tif&max_size=0",
        StatusCode::BAD_REQUEST,
        "invalid_parameter",
    )
    .await;
}

// =============================================================================
// Static Registries and Validation
// =============================================================================

#[tokio::test]
async fn test_validate() {
    let router = router();
    let json = body_json(get(&router, "/api/validate?filename=geo.tif").await).await;
    assert_eq!(json["identifier"], "geo.tif");
    assert!(json["is_valid"].is_boolean());
    assert!(json["errors"].is_array());
    assert!(json["warnings"].is_array());
}

#[tokio::test]
async fn test_palettes_and_basemaps() {
    let router = router();
    let json = body_json(get(&router, "/api/palettes").await).await;
    let palettes = json["palettes"].as_array().unwrap();
    assert!(palettes.iter().any(|p| p == "viridis"));
    assert!(palettes.iter().any(|p| p == "gray"));

    let json = body_json(get(&router, "/api/basemaps").await).await;
    let basemaps = json["basemaps"].as_array().unwrap();
    assert!(!basemaps.is_empty());
    assert!(basemaps.iter().any(|b| b["name"] == "OpenStreetMap"));
    assert!(basemaps
        .iter()
        .all(|b| b["url"].as_str().is_some_and(|u| u.contains("{z}"))));
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let router = router();
    let response = get(&router, "/api/nothing-here").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
