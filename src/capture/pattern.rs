//! Synthetic capture backend: one primary display showing scrolling colour bars.
//!
//! Lets the whole pipeline run without a platform capture API.

use async_trait::async_trait;
use bytes::Bytes;

use super::{CaptureBackend, DisplayInfo, Frame, FrameSource, Rect};
use crate::{Error, Result};

const BARS: [[u8; 3]; 8] = [
    [235, 235, 235],
    [235, 235, 16],
    [16, 235, 235],
    [16, 235, 16],
    [235, 16, 235],
    [235, 16, 16],
    [16, 16, 235],
    [16, 16, 16],
];

/// Backend with a single 1920x1080 primary display.
#[derive(Debug, Clone)]
pub struct TestPatternBackend {
    display: DisplayInfo,
}

impl TestPatternBackend {
    pub fn new() -> Self {
        Self {
            display: DisplayInfo {
                index: 1,
                bounds: Rect::new(0, 0, 1920, 1080),
                primary: true,
            },
        }
    }
}

impl Default for TestPatternBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend for TestPatternBackend {
    fn displays(&self) -> Result<Vec<DisplayInfo>> {
        Ok(vec![self.display])
    }

    fn open(&self, bounds: Rect, width: u32, height: u32) -> Result<Box<dyn FrameSource>> {
        if !self.display.bounds.contains(&bounds) {
            return Err(Error::CaptureUnavailable(format!(
                "{bounds} is not on the test pattern display"
            )));
        }
        Ok(Box::new(TestPatternSource::new(width, height)))
    }
}

/// Colour bars that scroll a few pixels per frame.
pub struct TestPatternSource {
    width: u32,
    height: u32,
    /// Two bar cycles laid side by side so any offset yields a full row.
    strip: Vec<u8>,
    frame_index: u64,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32) -> Self {
        let bar_width = (width as usize / BARS.len()).max(1);
        let strip_len = width as usize * 2;
        let mut strip = Vec::with_capacity(strip_len * 3);
        for px in 0..strip_len {
            let bar = (px / bar_width) % BARS.len();
            strip.extend_from_slice(&BARS[bar]);
        }

        Self {
            width,
            height,
            strip,
            frame_index: 0,
        }
    }

    fn render(&self) -> Vec<u8> {
        let row_bytes = self.width as usize * 3;
        let offset = (self.frame_index as usize * 4) % (self.width.max(1) as usize) * 3;
        let row = &self.strip[offset..offset + row_bytes];

        let mut data = Vec::with_capacity(row_bytes * self.height as usize);
        for _ in 0..self.height {
            data.extend_from_slice(row);
        }
        data
    }
}

#[async_trait]
impl FrameSource for TestPatternSource {
    async fn next_frame(&mut self) -> Result<Frame> {
        let data = self.render();
        self.frame_index += 1;
        Ok(Frame {
            width: self.width,
            height: self.height,
            data: Bytes::from(data),
        })
    }
}
