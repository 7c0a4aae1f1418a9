//! Capture region model and the frame-source seam.
//!
//! The desktop capture API lives outside this crate. A [`CaptureBackend`]
//! enumerates displays and opens a [`FrameSource`] that yields packed RGB24
//! frames already scaled to the encoder resolution.

mod pattern;

pub use pattern::{TestPatternBackend, TestPatternSource};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Rectangle in screen pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    /// Whether `other` lies entirely inside this rectangle.
    pub fn contains(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} at ({}, {})", self.width, self.height, self.x, self.y)
    }
}

/// Parses `x,y,width,height`.
impl FromStr for Rect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(Error::CaptureUnavailable(format!(
                "expected x,y,width,height but got {s:?}"
            )));
        }
        let invalid = |_| Error::CaptureUnavailable(format!("invalid region {s:?}"));
        Ok(Rect {
            x: parts[0].parse().map_err(invalid)?,
            y: parts[1].parse().map_err(invalid)?,
            width: parts[2].parse().map_err(invalid)?,
            height: parts[3].parse().map_err(invalid)?,
        })
    }
}

/// A display as enumerated by the capture layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayInfo {
    /// 1-based monitor index.
    pub index: usize,
    pub bounds: Rect,
    pub primary: bool,
}

/// What the caller asked to capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CaptureRegion {
    /// A window or arbitrary area in screen pixels.
    Area(Rect),
    /// A whole display by 1-based monitor index.
    FullDisplay { monitor: usize },
}

impl CaptureRegion {
    /// Resolve the region against the enumerated displays.
    ///
    /// An area outside every display, or a monitor index that does not
    /// exist, falls back to the primary display's full bounds. A zero-sized
    /// area or an empty display list is [`Error::CaptureUnavailable`].
    pub fn resolve(&self, displays: &[DisplayInfo]) -> Result<Rect> {
        let primary = displays
            .iter()
            .find(|d| d.primary)
            .or_else(|| displays.first())
            .ok_or_else(|| Error::CaptureUnavailable("no displays available".into()))?;

        match self {
            CaptureRegion::Area(rect) => {
                if rect.width == 0 || rect.height == 0 {
                    return Err(Error::CaptureUnavailable(format!(
                        "capture region {rect} has no area"
                    )));
                }
                if displays.iter().any(|d| d.bounds.contains(rect)) {
                    Ok(*rect)
                } else {
                    tracing::warn!(
                        "Region {} is outside every display, using primary display {}",
                        rect,
                        primary.bounds
                    );
                    Ok(primary.bounds)
                }
            }
            CaptureRegion::FullDisplay { monitor } => {
                match displays.iter().find(|d| d.index == *monitor) {
                    Some(display) => Ok(display.bounds),
                    None => {
                        tracing::warn!("Monitor {} not found, using primary monitor", monitor);
                        Ok(primary.bounds)
                    }
                }
            }
        }
    }
}

impl fmt::Display for CaptureRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureRegion::Area(rect) => write!(f, "region {rect}"),
            CaptureRegion::FullDisplay { monitor } => write!(f, "monitor {monitor}"),
        }
    }
}

/// One packed RGB24 frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
}

/// Produces frames at the encoder resolution, one per call.
#[async_trait]
pub trait FrameSource: Send {
    async fn next_frame(&mut self) -> Result<Frame>;
}

/// Entry point into the platform capture layer.
pub trait CaptureBackend: Send + Sync {
    fn displays(&self) -> Result<Vec<DisplayInfo>>;

    /// Open a frame source for `bounds`, scaling output to `width`x`height`.
    fn open(&self, bounds: Rect, width: u32, height: u32) -> Result<Box<dyn FrameSource>>;
}
