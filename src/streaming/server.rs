//! HTTP endpoint for the live stream.
//!
//! Every body is a stream of small chunks with no `Content-Length`, so hyper
//! uses chunked transfer encoding and the first bytes leave as soon as the
//! handler has them.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::store::SegmentStore;
use crate::config::{ServerConfig, StreamFormat};
use crate::Error;

pub const MPEGTS_MIME: &str = "video/mp2t";
pub const HLS_MIME: &str = "application/vnd.apple.mpegurl";

const NO_CACHE: &str = "no-cache, no-store, must-revalidate";
const DLNA_TRANSFER_MODE: &str = "transferMode.dlna.org";
const DLNA_CONTENT_FEATURES: &str = "contentFeatures.dlna.org";
const DLNA_TS_FEATURES: &str =
    "DLNA.ORG_PN=MPEG_TS_SD_NA;DLNA.ORG_OP=01;DLNA.ORG_FLAGS=01700000000000000000000000000000";

/// How long graceful shutdown may take before the server task is aborted.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Shared handler state.
#[derive(Clone)]
pub struct ServerState {
    pub store: Arc<SegmentStore>,
    pub wait_timeout: Duration,
    pub chunk_size: usize,
}

impl ServerState {
    pub fn new(store: Arc<SegmentStore>, config: &ServerConfig) -> Self {
        Self {
            store,
            wait_timeout: config.segment_wait_timeout(),
            chunk_size: config.chunk_size.max(1),
        }
    }
}

/// Wrapper so handlers can return [`Error`] directly.
pub struct AppError(Error);

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!(status = %status, error = %self.0, "Server error in stream handler");
        } else {
            tracing::debug!(status = %status, error = %self.0, "Stream request failed");
        }

        let body = json!({
            "error": self.0.to_string(),
            "code": self.0.kind(),
        });

        let mut response = (status, axum::Json(body)).into_response();
        response
            .headers_mut()
            .insert(header::CACHE_CONTROL, HeaderValue::from_static(NO_CACHE));
        response
    }
}

/// Build the stream router.
///
/// - `GET /stream.m3u8` - live playlist
/// - `GET /segments/{sequence}.ts` - one segment, waiting briefly if not yet produced
/// - `GET /stream.ts` - endless MPEG-TS concatenation of new segments
/// - `GET /health` - liveness and the current window
pub fn router(state: ServerState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/stream.m3u8", get(playlist))
        .route("/segments/:name", get(segment))
        .route("/stream.ts", get(live_ts))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check(State(state): State<ServerState>) -> impl IntoResponse {
    let manifest = state.store.manifest();
    Json(json!({
        "status": "ok",
        "media_sequence": manifest.media_sequence,
        "segments": manifest.entries.len(),
        "window_secs": manifest.total_duration(),
    }))
}

async fn playlist(State(state): State<ServerState>) -> Response {
    let body = state.store.manifest().render();
    streaming_response(
        HLS_MIME,
        false,
        chunked(Bytes::from(body), state.chunk_size),
    )
}

async fn segment(
    State(state): State<ServerState>,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    let Some(sequence) = name
        .strip_suffix(".ts")
        .and_then(|s| s.parse::<u64>().ok())
    else {
        return Ok((StatusCode::BAD_REQUEST, "invalid segment name").into_response());
    };

    let segment = state.store.wait_for(sequence, state.wait_timeout).await?;
    tracing::debug!(sequence, bytes = segment.data.len(), "Serving segment");

    Ok(streaming_response(
        MPEGTS_MIME,
        true,
        chunked(segment.data.clone(), state.chunk_size),
    ))
}

async fn live_ts(State(state): State<ServerState>) -> Response {
    let start = state
        .store
        .newest_sequence()
        .unwrap_or_else(|| state.store.next_sequence());
    tracing::info!(start, "Live MPEG-TS client connected");

    let chunk_size = state.chunk_size;
    let body = live_segments(state, start).flat_map(move |data| chunked(data, chunk_size));
    streaming_response(MPEGTS_MIME, true, body)
}

/// Segment payloads from `start` onward, for as long as the store is open.
///
/// A client that falls behind the window skips to the newest segment.
fn live_segments(state: ServerState, start: u64) -> impl Stream<Item = Bytes> {
    stream::unfold((state, start), |(state, mut next)| async move {
        loop {
            match state.store.wait_for(next, state.wait_timeout).await {
                Ok(segment) => {
                    let data = segment.data.clone();
                    return Some((data, (state, next + 1)));
                }
                Err(Error::SegmentEvicted { .. }) => {
                    let newest = state.store.newest_sequence().unwrap_or(next + 1);
                    tracing::debug!(
                        from = next,
                        to = newest,
                        "Live client fell behind, skipping"
                    );
                    next = newest.max(next + 1);
                }
                Err(Error::SegmentNotFound { .. }) => continue,
                Err(_) => {
                    tracing::info!("Live MPEG-TS stream ended");
                    return None;
                }
            }
        }
    })
}

/// Split `data` into `chunk_size` slices without copying.
fn chunked(data: Bytes, chunk_size: usize) -> impl Stream<Item = Result<Bytes, std::io::Error>> {
    let chunk_size = chunk_size.max(1);
    let count = data.len().div_ceil(chunk_size);
    stream::iter((0..count).map(move |i| {
        let start = i * chunk_size;
        let end = (start + chunk_size).min(data.len());
        Ok(data.slice(start..end))
    }))
}

fn streaming_response<S>(content_type: &'static str, media: bool, body: S) -> Response
where
    S: Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static,
{
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, NO_CACHE)
        .header(header::PRAGMA, "no-cache")
        .header(header::EXPIRES, "0")
        .header(DLNA_TRANSFER_MODE, "Streaming");
    if media {
        builder = builder.header(DLNA_CONTENT_FEATURES, DLNA_TS_FEATURES);
    }

    builder
        .body(Body::from_stream(body))
        .unwrap_or_else(|e| AppError(Error::Internal(e.to_string())).into_response())
}

/// Running segment server bound to a local port.
pub struct SegmentServer {
    addr: SocketAddr,
    store: Arc<SegmentStore>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SegmentServer {
    /// Bind and start serving `store`.
    pub async fn bind(config: &ServerConfig, store: Arc<SegmentStore>) -> crate::Result<Self> {
        let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port))
            .await
            .map_err(|e| {
                std::io::Error::new(
                    e.kind(),
                    format!("failed to bind {}:{}: {e}", config.host, config.port),
                )
            })?;
        let addr = listener.local_addr()?;

        let app = router(ServerState::new(store.clone(), config));
        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();

        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(e) = result {
                tracing::error!("Segment server error: {}", e);
            }
        });

        tracing::info!("Segment server listening on {}", addr);
        Ok(Self {
            addr,
            store,
            cancel,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// URL a client at `host` should open for `format`.
    pub fn stream_url(&self, host: &str, format: StreamFormat) -> String {
        format!("http://{}:{}/{}", host, self.addr.port(), format.path())
    }

    /// Refuse new segment waits and release pending ones.
    pub fn stop_waits(&self) {
        self.store.close();
    }

    /// Stop accepting connections and wait for in-flight responses.
    pub async fn shutdown(self) {
        self.store.close();
        self.cancel.cancel();

        let mut task = self.task;
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
            tracing::warn!("Segment server did not drain in time, aborting");
            task.abort();
        }
        tracing::info!("Segment server on {} stopped", self.addr);
    }
}
