//! Live segment storage and delivery.
//!
//! The encoder supervisor publishes finalized segments into a
//! [`SegmentStore`]; the [`SegmentServer`] reads from it.
//!
//! # Routes
//!
//! - `GET /stream.m3u8` - live playlist of the retained window
//! - `GET /segments/{sequence}.ts` - one MPEG-TS segment
//! - `GET /stream.ts` - endless MPEG-TS for renderers without HLS support
//! - `GET /health` - liveness

pub mod manifest;
pub mod server;
pub mod store;

pub use manifest::{parse_media_playlist, Manifest, ManifestEntry, ParsedPlaylist};
pub use server::{router, SegmentServer, ServerState};
pub use store::{Lookup, Segment, SegmentStore};
