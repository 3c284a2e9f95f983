//! Control channel integration tests.
//!
//! Requests are fed to the channel's responder directly, the way the socket
//! loop does for every text frame, and the binary replies are decoded.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use raster_tileserver::raster::{DatasetRegistry, MemorySource};
use raster_tileserver::server::{decode_frame, respond, AppState, Multiplexer, ReplyHeader};
use raster_tileserver::tile::TileService;

use super::test_utils::{decode_rgba, fixture_source};

const TIMEOUT: Duration = Duration::from_secs(10);

fn state() -> AppState<MemorySource> {
    AppState::new(TileService::new(DatasetRegistry::new(fixture_source())))
}

async fn ask(
    state: &AppState<MemorySource>,
    mux: &Arc<Multiplexer<Vec<u8>>>,
    request: serde_json::Value,
) -> (ReplyHeader, Vec<u8>) {
    let frame = respond(state, mux, &request.to_string(), TIMEOUT)
        .await
        .unwrap();
    let (header, body) = decode_frame(&frame).unwrap();
    (header, body.to_vec())
}

#[tokio::test]
async fn test_get_tile_reply() {
    let state = state();
    let mux = Multiplexer::new();
    let (header, body) = ask(
        &state,
        &mux,
        json!({
            "id": 1,
            "kind": "get_tile",
            "msg": {"z": 0, "x": 0, "y": 0, "identifier": "world.tif",
                    "params": {"vmin": "0", "vmax": "100"}}
        }),
    )
    .await;

    assert!(header.ok);
    assert_eq!(header.id, json!(1));
    assert_eq!(header.content_type.as_deref(), Some("image/png"));
    let image = decode_rgba(&body);
    assert_eq!(image.get_pixel(192, 128).0, [128, 128, 128, 255]);
    assert_eq!(mux.pending(), 0);
}

#[tokio::test]
async fn test_get_tile_reply_matches_http_cache_entry() {
    let state = state();
    let mux = Multiplexer::new();
    let request = json!({
        "id": "a",
        "kind": "get_tile",
        "msg": {"z": 0, "x": 0, "y": 0, "identifier": "rgb.tif", "format": "jpg"}
    });
    let (header, first) = ask(&state, &mux, request.clone()).await;
    assert!(header.ok);
    assert_eq!(header.content_type.as_deref(), Some("image/jpeg"));

    let (_, second) = ask(&state, &mux, request).await;
    assert_eq!(first, second);
    assert_eq!(state.tile_service.cache().len(), 1);
}

#[tokio::test]
async fn test_concurrent_requests_are_matched_by_id() {
    let state = state();
    let mux = Multiplexer::new();

    let handles: Vec<_> = (0..4u32)
        .map(|i| {
            let state = state.clone();
            let mux = Arc::clone(&mux);
            tokio::spawn(async move {
                let request = json!({
                    "id": i,
                    "kind": "get_tile",
                    "msg": {"z": 1, "x": i % 2, "y": i / 2, "identifier": "rgb.tif"}
                });
                let (header, body) = ask(&state, &mux, request).await;
                (i, header, body)
            })
        })
        .collect();

    for handle in handles {
        let (i, header, body) = handle.await.unwrap();
        assert!(header.ok);
        assert_eq!(header.id, json!(i));
        assert!(!body.is_empty());
    }
    assert_eq!(mux.pending(), 0);
}

#[tokio::test]
async fn test_tile_errors_are_reported_in_the_header() {
    let state = state();
    let mux = Multiplexer::new();

    let (header, body) = ask(
        &state,
        &mux,
        json!({"id": 2, "kind": "get_tile",
               "msg": {"z": 0, "x": 0, "y": 0, "identifier": "missing.tif"}}),
    )
    .await;
    assert!(!header.ok);
    assert_eq!(header.status, Some(404));
    assert!(header.error.is_some());
    assert!(body.is_empty());

    let (header, _) = ask(
        &state,
        &mux,
        json!({"id": 3, "kind": "get_tile",
               "msg": {"z": 1, "x": 9, "y": 0, "identifier": "rgb.tif"}}),
    )
    .await;
    assert_eq!(header.status, Some(404));

    let (header, _) = ask(
        &state,
        &mux,
        json!({"id": 4, "kind": "get_tile",
               "msg": {"z": 0, "x": 0, "y": 0, "identifier": "rgb.tif",
                       "params": {"band": "0"}}}),
    )
    .await;
    assert_eq!(header.status, Some(400));
    assert_eq!(mux.pending(), 0);
}

#[tokio::test]
async fn test_malformed_requests() {
    let state = state();
    let mux = Multiplexer::new();

    let frame = respond(&state, &mux, "{not json", TIMEOUT).await.unwrap();
    let (header, _) = decode_frame(&frame).unwrap();
    assert!(!header.ok);
    assert!(header.id.is_null());
    assert_eq!(header.status, Some(400));

    let (header, _) = ask(&state, &mux, json!({"kind": "get_tile", "msg": {}})).await;
    assert_eq!(header.status, Some(400));

    let (header, _) = ask(&state, &mux, json!({"id": 5, "kind": "subscribe", "msg": {}})).await;
    assert_eq!(header.id, json!(5));
    assert_eq!(header.status, Some(400));
    assert!(header.error.unwrap().contains("subscribe"));

    let (header, _) = ask(&state, &mux, json!({"id": 6, "kind": "get_tile", "msg": {"z": 0}})).await;
    assert_eq!(header.status, Some(400));
}

#[tokio::test]
async fn test_duplicate_pending_id_is_rejected() {
    let state = state();
    let mux = Multiplexer::new();
    let held = mux.register("7".to_string()).unwrap();

    let (header, _) = ask(
        &state,
        &mux,
        json!({"id": 7, "kind": "get_tile",
               "msg": {"z": 0, "x": 0, "y": 0, "identifier": "rgb.tif"}}),
    )
    .await;
    assert_eq!(header.status, Some(409));
    assert_eq!(mux.pending(), 1);

    drop(held);
    assert_eq!(mux.pending(), 0);
}
