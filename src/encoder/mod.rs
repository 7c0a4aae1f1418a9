//! Encoder abstraction and supervision.
//!
//! An [`Encoder`] consumes raw RGB24 frames and produces finalized,
//! independently decodable segments. The concrete tool is hidden behind the
//! trait so the [`EncoderSupervisor`] does not care whether it is ffmpeg or
//! something else.

mod ffmpeg;
mod supervisor;

pub use ffmpeg::{build_args, locate_ffmpeg, FfmpegEncoder, PLAYLIST_NAME, SEGMENT_PATTERN};
pub use supervisor::{EncoderHandle, EncoderSupervisor};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::capture::Frame;
use crate::config::EncoderConfig;
use crate::{Error, Result};

/// A segment the encoder has finished writing.
#[derive(Debug, Clone)]
pub struct EncodedSegment {
    pub duration_secs: f64,
    pub data: Bytes,
}

/// Liveness of an encoder, as seen by whoever owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EncoderHealth {
    Alive,
    /// The encoder exited without being asked to.
    Crashed { code: Option<i32> },
    /// The frame source failed mid-stream.
    CaptureLost { message: String },
    /// Stopped on request.
    Stopped,
}

impl EncoderHealth {
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            EncoderHealth::Crashed { .. } | EncoderHealth::CaptureLost { .. }
        )
    }

    /// The error a failed encoder ends a session with.
    pub fn to_error(&self) -> Option<Error> {
        match self {
            EncoderHealth::Crashed { code } => Some(Error::EncoderCrashed { code: *code }),
            EncoderHealth::CaptureLost { message } => {
                Some(Error::CaptureUnavailable(message.clone()))
            }
            EncoderHealth::Alive | EncoderHealth::Stopped => None,
        }
    }
}

/// Narrow interface over an external encoding tool.
#[async_trait]
pub trait Encoder: Send {
    /// Short name for logs.
    fn name(&self) -> &str;

    async fn start(&mut self, config: &EncoderConfig) -> Result<()>;

    /// Hand one frame to the encoder.
    async fn feed_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Segments finalized since the last call, oldest first.
    async fn poll_new_output(&mut self) -> Result<Vec<EncodedSegment>>;

    fn health(&mut self) -> EncoderHealth;

    /// Stop the encoder and release everything it holds. Safe to call more
    /// than once, and after a crash.
    async fn stop(&mut self) -> Result<()>;
}

/// Creates a fresh encoder per session.
pub trait EncoderFactory: Send + Sync {
    fn create(&self) -> Box<dyn Encoder>;
}

impl<F> EncoderFactory for F
where
    F: Fn() -> Box<dyn Encoder> + Send + Sync,
{
    fn create(&self) -> Box<dyn Encoder> {
        self()
    }
}

/// Factory for [`FfmpegEncoder`].
pub fn ffmpeg_factory() -> Arc<dyn EncoderFactory> {
    Arc::new(|| Box::new(FfmpegEncoder::new()) as Box<dyn Encoder>)
}
