//! WebSocket control channel.
//!
//! Clients send JSON text frames and get binary frames back:
//!
//! ```text
//! request  (text):   {"id": 7, "kind": "get_tile", "msg": {"z": 3, "x": 4, "y": 2, "identifier": "dem.tif"}}
//!
//! reply    (binary): ┌──────────────┬──────────────────────────────┬─────────────┐
//!                    │ u32 BE len n │ n bytes JSON header           │ tile bytes  │
//!                    │              │ {id, ok, content_type|error} │ (if ok)     │
//!                    └──────────────┴──────────────────────────────┴─────────────┘
//! ```
//!
//! Requests run concurrently, so replies may arrive out of order; the `id`
//! correlates them. A [`Multiplexer`] holds one pending slot per id. The slot
//! is filled exactly once and removed when filled, when its waiter gives up
//! (timeout) or when the waiter is dropped. Results for ids that no longer
//! have a slot are discarded.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::error::TileError;
use crate::raster::RasterSource;
use crate::render::{ImageFormat, RenderParams};
use crate::tile::TileRequest;

use super::error::classify;
use super::handlers::AppState;

/// Default time a channel request may take before a timeout reply is sent.
pub const DEFAULT_CHANNEL_TIMEOUT: Duration = Duration::from_secs(30);

/// Outgoing frames buffered per connection.
const OUTGOING_FRAMES: usize = 64;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// Multiplexer
// =============================================================================

/// Why a pending reply produced no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyError {
    /// Nothing arrived within the timeout
    Timeout,
    /// The producing side went away without answering
    Closed,
}

/// Correlation-id table of pending one-shot replies.
pub struct Multiplexer<T> {
    slots: Mutex<HashMap<String, (u64, oneshot::Sender<T>)>>,
    next_seq: AtomicU64,
}

impl<T> Multiplexer<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            slots: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
        })
    }

    /// Open a slot for `id`.
    ///
    /// Returns `None` when a reply for `id` is already pending.
    pub fn register(self: &Arc<Self>, id: impl Into<String>) -> Option<PendingReply<T>> {
        let id = id.into();
        let mut slots = lock(&self.slots);
        if slots.contains_key(&id) {
            return None;
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        slots.insert(id.clone(), (seq, tx));
        Some(PendingReply {
            mux: Arc::clone(self),
            id,
            seq,
            rx,
        })
    }

    /// Deliver `value` to the slot of `id`.
    ///
    /// Returns `false` (and drops `value`) when no slot is pending for `id`.
    pub fn fulfill(&self, id: &str, value: T) -> bool {
        let Some((_, tx)) = lock(&self.slots).remove(id) else {
            debug!(id, "Discarding reply for unknown id");
            return false;
        };
        tx.send(value).is_ok()
    }

    /// Number of slots awaiting a value.
    pub fn pending(&self) -> usize {
        lock(&self.slots).len()
    }
}

/// Receiving end of a registered slot. Dropping it frees the slot.
pub struct PendingReply<T> {
    mux: Arc<Multiplexer<T>>,
    id: String,
    seq: u64,
    rx: oneshot::Receiver<T>,
}

impl<T> PendingReply<T> {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the value, at most `timeout`.
    pub async fn wait(mut self, timeout: Duration) -> Result<T, ReplyError> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(ReplyError::Closed),
            Err(_) => Err(ReplyError::Timeout),
        }
    }
}

impl<T> Drop for PendingReply<T> {
    fn drop(&mut self) {
        let mut slots = lock(&self.mux.slots);
        // A later registration may have reused the id.
        if slots.get(&self.id).is_some_and(|(seq, _)| *seq == self.seq) {
            slots.remove(&self.id);
        }
    }
}

// =============================================================================
// Frames
// =============================================================================

/// A text frame from the client.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelRequest {
    #[serde(default)]
    pub id: Value,
    pub kind: String,
    #[serde(default)]
    pub msg: Value,
}

/// Payload of a `get_tile` request.
#[derive(Debug, Clone, Deserialize)]
pub struct GetTileMessage {
    pub z: u32,
    pub x: u32,
    pub y: u32,
    pub identifier: String,
    /// `png` (default) or `jpg`
    #[serde(default)]
    pub format: Option<String>,
    /// Rendering parameters, same keys as the tile endpoint's query string
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

/// JSON header of a reply frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyHeader {
    pub id: Value,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ReplyHeader {
    pub fn success(id: Value, content_type: &str) -> Self {
        Self {
            id,
            ok: true,
            content_type: Some(content_type.to_string()),
            error: None,
            status: None,
        }
    }

    pub fn failure(id: Value, status: u16, message: impl Into<String>) -> Self {
        Self {
            id,
            ok: false,
            content_type: None,
            error: Some(message.into()),
            status: Some(status),
        }
    }

    fn from_error(id: Value, err: &TileError) -> Self {
        Self::failure(id, classify(err).0.as_u16(), err.to_string())
    }
}

/// Serialize a reply frame.
///
/// # Errors
/// `TileError::Encode` if the header cannot be serialized.
pub fn encode_frame(header: &ReplyHeader, body: &[u8]) -> Result<Vec<u8>, TileError> {
    let json = serde_json::to_vec(header).map_err(|e| TileError::Encode {
        message: format!("reply header: {}", e),
    })?;
    let len = u32::try_from(json.len()).map_err(|_| TileError::Encode {
        message: "reply header too large".to_string(),
    })?;
    let mut frame = Vec::with_capacity(4 + json.len() + body.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&json);
    frame.extend_from_slice(body);
    Ok(frame)
}

/// Split a reply frame into header and body.
///
/// # Errors
/// `TileError::Parameter` for truncated frames or a malformed header.
pub fn decode_frame(frame: &[u8]) -> Result<(ReplyHeader, &[u8]), TileError> {
    if frame.len() < 4 {
        return Err(TileError::parameter("frame shorter than its length prefix"));
    }
    let (prefix, rest) = frame.split_at(4);
    let len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
    if rest.len() < len {
        return Err(TileError::parameter(format!(
            "frame header claims {} bytes, {} available",
            len,
            rest.len()
        )));
    }
    let (json, body) = rest.split_at(len);
    let header = serde_json::from_slice(json)
        .map_err(|e| TileError::parameter(format!("bad reply header: {}", e)))?;
    Ok((header, body))
}

// =============================================================================
// Request handling
// =============================================================================

fn tile_request(msg: Value, defaults: &RenderParams) -> Result<TileRequest, TileError> {
    let msg: GetTileMessage = serde_json::from_value(msg)
        .map_err(|e| TileError::parameter(format!("bad get_tile message: {}", e)))?;
    let pairs: Vec<(String, String)> = msg.params.into_iter().collect();
    let mut params = RenderParams::from_query(&pairs, defaults)?;
    if let Some(format) = msg.format.as_deref() {
        params.format = ImageFormat::from_extension(format)
            .ok_or_else(|| TileError::parameter(format!("unknown tile format '{}'", format)))?;
    }
    Ok(TileRequest::new(msg.identifier, msg.z, msg.x, msg.y).with_params(params))
}

/// Answer one text frame with one binary frame.
///
/// The tile is computed on its own task and delivered through `mux`; if it
/// does not arrive within `timeout` a 504 reply is produced instead.
///
/// # Errors
/// Only if the reply frame itself cannot be encoded.
pub async fn respond<S: RasterSource + 'static>(
    state: &AppState<S>,
    mux: &Arc<Multiplexer<Vec<u8>>>,
    text: &str,
    timeout: Duration,
) -> Result<Vec<u8>, TileError> {
    let request: ChannelRequest = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(e) => {
            return encode_frame(
                &ReplyHeader::failure(Value::Null, 400, format!("malformed request: {}", e)),
                &[],
            )
        }
    };
    let id = request.id;
    if id.is_null() {
        return encode_frame(&ReplyHeader::failure(id, 400, "request id is required"), &[]);
    }
    if request.kind != "get_tile" {
        let message = format!("unknown request kind '{}'", request.kind);
        return encode_frame(&ReplyHeader::failure(id, 400, message), &[]);
    }
    let tile = match tile_request(request.msg, &state.defaults) {
        Ok(tile) => tile,
        Err(e) => return encode_frame(&ReplyHeader::from_error(id, &e), &[]),
    };

    let key = id.to_string();
    let Some(pending) = mux.register(key.clone()) else {
        let message = format!("request {} is already pending", key);
        return encode_frame(&ReplyHeader::failure(id, 409, message), &[]);
    };

    let service = Arc::clone(&state.tile_service);
    let producer = Arc::clone(mux);
    let reply_id = id.clone();
    tokio::spawn(async move {
        let frame = match service.get_tile(tile).await {
            Ok(tile) => encode_frame(&ReplyHeader::success(reply_id, tile.content_type), &tile.bytes),
            Err(e) => encode_frame(&ReplyHeader::from_error(reply_id, &e), &[]),
        };
        match frame {
            Ok(frame) => {
                producer.fulfill(&key, frame);
            }
            Err(e) => error!(id = %key, error = %e, "Failed to encode channel reply"),
        }
    });

    match pending.wait(timeout).await {
        Ok(frame) => Ok(frame),
        Err(ReplyError::Timeout) => encode_frame(
            &ReplyHeader::failure(id, 504, format!("no reply within {:?}", timeout)),
            &[],
        ),
        Err(ReplyError::Closed) => {
            encode_frame(&ReplyHeader::failure(id, 500, "reply was never produced"), &[])
        }
    }
}

/// Handle `GET /api/ws`.
pub async fn ws_handler<S: RasterSource + 'static>(
    ws: WebSocketUpgrade,
    State(state): State<AppState<S>>,
) -> Response {
    ws.on_upgrade(move |socket| serve_channel(socket, state))
}

async fn serve_channel<S: RasterSource + 'static>(mut socket: WebSocket, state: AppState<S>) {
    let mux: Arc<Multiplexer<Vec<u8>>> = Multiplexer::new();
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(OUTGOING_FRAMES);
    let timeout = state.channel_timeout;
    info!("Control channel opened");

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let (state, mux, tx) = (state.clone(), Arc::clone(&mux), tx.clone());
                    tokio::spawn(async move {
                        match respond(&state, &mux, text.as_str(), timeout).await {
                            Ok(frame) => {
                                let _ = tx.send(frame).await;
                            }
                            Err(e) => error!(error = %e, "Dropping channel reply"),
                        }
                    });
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "Control channel receive failed");
                    break;
                }
            },
            Some(frame) = rx.recv() => {
                if socket.send(Message::Binary(frame.into())).await.is_err() {
                    break;
                }
            }
        }
    }

    info!(pending = mux.pending(), "Control channel closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fulfilled_exactly_once() {
        let mux = Multiplexer::<u32>::new();
        let pending = mux.register("a").unwrap();
        assert!(mux.register("a").is_none());
        assert_eq!(mux.pending(), 1);

        assert!(mux.fulfill("a", 1));
        assert!(!mux.fulfill("a", 2));
        assert_eq!(pending.wait(Duration::from_secs(1)).await, Ok(1));
        assert_eq!(mux.pending(), 0);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_discarded() {
        let mux = Multiplexer::<u32>::new();
        assert!(!mux.fulfill("ghost", 1));
        assert_eq!(mux.pending(), 0);
    }

    #[tokio::test]
    async fn test_timeout_and_drop_free_the_slot() {
        let mux = Multiplexer::<u32>::new();
        let pending = mux.register("slow").unwrap();
        assert_eq!(
            pending.wait(Duration::from_millis(10)).await,
            Err(ReplyError::Timeout)
        );
        assert_eq!(mux.pending(), 0);
        assert!(!mux.fulfill("slow", 1));

        let pending = mux.register("dropped").unwrap();
        drop(pending);
        assert_eq!(mux.pending(), 0);
    }

    #[tokio::test]
    async fn test_stale_drop_keeps_newer_slot() {
        let mux = Multiplexer::<u32>::new();
        let first = mux.register("id").unwrap();
        assert!(mux.fulfill("id", 1));
        let second = mux.register("id").unwrap();
        drop(first);
        assert_eq!(mux.pending(), 1);
        assert!(mux.fulfill("id", 2));
        assert_eq!(second.wait(Duration::from_secs(1)).await, Ok(2));
    }

    #[test]
    fn test_frame_layout() {
        let header = ReplyHeader::success(Value::from(7), "image/png");
        let frame = encode_frame(&header, b"PNGDATA").unwrap();
        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        let json: Value = serde_json::from_slice(&frame[4..4 + len]).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["ok"], true);
        assert_eq!(json["content_type"], "image/png");
        assert!(json.get("error").is_none());
        assert_eq!(&frame[4 + len..], b"PNGDATA");

        let (decoded, body) = decode_frame(&frame).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(body, b"PNGDATA");
    }

    #[test]
    fn test_truncated_frames_rejected() {
        assert!(decode_frame(&[0, 0]).is_err());
        assert!(decode_frame(&[0, 0, 0, 9, b'{']).is_err());
    }

    #[test]
    fn test_tile_request_from_message() {
        let msg = serde_json::json!({
            "z": 3, "x": 4, "y": 2, "identifier": "dem.tif",
            "format": "jpg",
            "params": {"colormap": "viridis", "vmin": "0", "vmax": "100"}
        });
        let request = tile_request(msg, &RenderParams::default()).unwrap();
        assert_eq!((request.z, request.x, request.y), (3, 4, 2));
        assert_eq!(request.params.format, ImageFormat::Jpeg);
        assert_eq!(request.params.colormap.as_deref(), Some("viridis"));
        assert_eq!(request.params.vmax, vec![100.0]);

        let bad = serde_json::json!({"z": 3, "x": 4});
        assert!(tile_request(bad, &RenderParams::default()).unwrap_err().is_parameter());
    }
}
