//! HTTP server layer for the raster tile server.
//!
//! This module provides the HTTP API and the WebSocket control channel.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │     GET /api/tiles/{z}/{x}/{y}.png    GET /api/ws (WebSocket)   │
//! │                                                                 │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────────┐  │
//! │  │  handlers   │  │   channel   │  │        routes           │  │
//! │  │ (requests)  │  │ (multiplex) │  │  (router config)        │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────────┘  │
//! │  ┌─────────────┐  ┌─────────────┐                               │
//! │  │    error    │  │  basemaps   │                               │
//! │  │ (→ status)  │  │  (static)   │                               │
//! │  └─────────────┘  └─────────────┘                               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod basemaps;
pub mod channel;
pub mod error;
pub mod handlers;
pub mod routes;

pub use basemaps::{basemap, basemaps, Basemap};
pub use channel::{
    decode_frame, encode_frame, respond, ws_handler, ChannelRequest, GetTileMessage, Multiplexer,
    PendingReply, ReplyError, ReplyHeader, DEFAULT_CHANNEL_TIMEOUT,
};
pub use error::{classify, ErrorResponse};
pub use handlers::{
    health_handler, tile_handler, AppState, HealthResponse, MetadataResponse, TilePathParams,
    DEFAULT_THUMBNAIL_SIZE,
};
pub use routes::{create_router, create_router_with_state, RouterConfig};
