//! ffmpeg-backed encoder.
//!
//! ffmpeg reads raw RGB24 frames on stdin and writes an HLS playlist plus
//! MPEG-TS segments into a per-session temporary directory. A segment is
//! listed in ffmpeg's playlist only once it has been closed, so the playlist
//! doubles as the completion signal.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};

use super::{EncodedSegment, Encoder, EncoderHealth};
use crate::capture::Frame;
use crate::config::EncoderConfig;
use crate::streaming::parse_media_playlist;
use crate::{Error, Result};

pub const PLAYLIST_NAME: &str = "stream.m3u8";
pub const SEGMENT_PATTERN: &str = "segment_%05d.ts";

/// How long ffmpeg gets to flush after stdin closes before it is killed.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Arguments for a low-latency rawvideo -> HLS run writing into `out_dir`.
pub fn build_args(config: &EncoderConfig, out_dir: &Path) -> Vec<String> {
    let bitrate = format!("{}k", config.bitrate_kbps);
    let bufsize = format!("{}k", (config.bitrate_kbps / 4).max(1));

    let mut args: Vec<String> = [
        "-hide_banner",
        "-loglevel",
        "warning",
        "-nostats",
        "-fflags",
        "+flush_packets+nobuffer",
        "-flags",
        "+low_delay",
        "-f",
        "rawvideo",
        "-pix_fmt",
        "rgb24",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    args.extend([
        "-s".to_string(),
        format!("{}x{}", config.width, config.height),
        "-r".to_string(),
        config.fps.to_string(),
        "-i".to_string(),
        "pipe:0".to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-profile:v".to_string(),
        "main".to_string(),
        "-level".to_string(),
        "3.1".to_string(),
        "-preset".to_string(),
        config.preset.clone(),
        "-tune".to_string(),
        "zerolatency".to_string(),
        "-b:v".to_string(),
        bitrate.clone(),
        "-maxrate".to_string(),
        bitrate,
        "-bufsize".to_string(),
        bufsize,
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-g".to_string(),
        config.keyframe_interval_frames().to_string(),
        "-keyint_min".to_string(),
        config.keyframe_interval_frames().to_string(),
        "-sc_threshold".to_string(),
        "0".to_string(),
        "-max_delay".to_string(),
        "0".to_string(),
        "-muxdelay".to_string(),
        "0".to_string(),
        "-f".to_string(),
        "hls".to_string(),
        "-hls_time".to_string(),
        config.segment_duration_secs.to_string(),
        "-hls_list_size".to_string(),
        (config.retain_segments * 2).to_string(),
        "-hls_flags".to_string(),
        "delete_segments+omit_endlist+independent_segments".to_string(),
        "-hls_segment_type".to_string(),
        "mpegts".to_string(),
        "-start_number".to_string(),
        "0".to_string(),
        "-hls_segment_filename".to_string(),
        out_dir.join(SEGMENT_PATTERN).to_string_lossy().to_string(),
        out_dir.join(PLAYLIST_NAME).to_string_lossy().to_string(),
    ]);

    args
}

/// Resolve the ffmpeg binary from config or `PATH`.
pub fn locate_ffmpeg(config: &EncoderConfig) -> Result<PathBuf> {
    match &config.ffmpeg_path {
        Some(path) if path.exists() => Ok(path.clone()),
        Some(path) => Err(Error::tool(
            "ffmpeg",
            format!("configured path {} does not exist", path.display()),
        )),
        None => which::which("ffmpeg")
            .map_err(|e| Error::tool("ffmpeg", format!("not found on PATH: {e}"))),
    }
}

/// Encoder running ffmpeg as a child process.
#[derive(Default)]
pub struct FfmpegEncoder {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    workdir: Option<TempDir>,
    frame_size: usize,
    /// Next ffmpeg sequence number not yet handed out.
    next_sequence: u64,
    stopping: bool,
    final_health: Option<EncoderHealth>,
}

impl FfmpegEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// OS process id while running.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    /// Output directory while running.
    pub fn workdir(&self) -> Option<&Path> {
        self.workdir.as_ref().map(|d| d.path())
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn start(&mut self, config: &EncoderConfig) -> Result<()> {
        if self.child.is_some() {
            return Err(Error::Internal("ffmpeg encoder already started".into()));
        }

        let ffmpeg = locate_ffmpeg(config)?;
        let workdir = tempfile::Builder::new().prefix("glasscast-").tempdir()?;
        let args = build_args(config, workdir.path());

        tracing::info!(
            "Starting ffmpeg: {}x{} @ {} fps, {} kbps, {}s segments",
            config.width,
            config.height,
            config.fps,
            config.bitrate_kbps,
            config.segment_duration_secs
        );
        tracing::debug!("ffmpeg {}", args.join(" "));

        let mut child = Command::new(&ffmpeg)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::tool("ffmpeg", format!("failed to spawn: {e}")))?;

        // ffmpeg blocks once the stderr pipe fills, so drain it continuously.
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "glasscast::encoder::ffmpeg", "{}", line);
                }
            });
        }

        self.stdin = child.stdin.take();
        self.child = Some(child);
        self.workdir = Some(workdir);
        self.frame_size = config.frame_size();
        self.next_sequence = 0;
        self.stopping = false;
        self.final_health = None;

        if let Some(pid) = self.pid() {
            tracing::info!(pid, "ffmpeg started");
        }
        Ok(())
    }

    async fn feed_frame(&mut self, frame: &Frame) -> Result<()> {
        if frame.data.len() != self.frame_size {
            return Err(Error::Internal(format!(
                "frame is {} bytes, encoder expects {}",
                frame.data.len(),
                self.frame_size
            )));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| Error::Internal("ffmpeg stdin is closed".into()))?;
        stdin.write_all(&frame.data).await?;
        Ok(())
    }

    async fn poll_new_output(&mut self) -> Result<Vec<EncodedSegment>> {
        let Some(dir) = self.workdir.as_ref().map(|d| d.path().to_path_buf()) else {
            return Ok(Vec::new());
        };

        let text = match tokio::fs::read_to_string(dir.join(PLAYLIST_NAME)).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let playlist = parse_media_playlist(&text);
        let mut segments = Vec::new();
        for (sequence, duration, uri) in playlist.numbered() {
            if sequence < self.next_sequence {
                continue;
            }
            self.next_sequence = sequence + 1;

            match tokio::fs::read(dir.join(uri)).await {
                Ok(data) => segments.push(EncodedSegment {
                    duration_secs: duration,
                    data: Bytes::from(data),
                }),
                Err(e) => {
                    tracing::warn!(
                        sequence,
                        "Segment {} vanished before it was read: {}",
                        uri,
                        e
                    );
                }
            }
        }

        Ok(segments)
    }

    fn health(&mut self) -> EncoderHealth {
        if let Some(health) = &self.final_health {
            return health.clone();
        }
        let Some(child) = self.child.as_mut() else {
            return EncoderHealth::Stopped;
        };

        match child.try_wait() {
            Ok(None) => EncoderHealth::Alive,
            Ok(Some(_)) if self.stopping => EncoderHealth::Stopped,
            Ok(Some(status)) => {
                let health = EncoderHealth::Crashed {
                    code: status.code(),
                };
                self.final_health = Some(health.clone());
                health
            }
            Err(e) => {
                tracing::warn!("Failed to query ffmpeg status: {}", e);
                EncoderHealth::Crashed { code: None }
            }
        }
    }

    async fn stop(&mut self) -> Result<()> {
        self.stopping = true;
        // Closing stdin lets ffmpeg flush the last segment and exit.
        drop(self.stdin.take());

        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(STOP_TIMEOUT, child.wait()).await {
                Ok(Ok(status)) => tracing::info!("ffmpeg exited with {}", status),
                Ok(Err(e)) => tracing::warn!("Failed to wait for ffmpeg: {}", e),
                Err(_) => {
                    tracing::warn!("ffmpeg did not exit within {:?}, killing", STOP_TIMEOUT);
                    if let Err(e) = child.kill().await {
                        tracing::warn!("Failed to kill ffmpeg: {}", e);
                    }
                }
            }
        }

        if let Some(workdir) = self.workdir.take() {
            let path = workdir.path().to_path_buf();
            if let Err(e) = workdir.close() {
                tracing::warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
        Ok(())
    }
}
