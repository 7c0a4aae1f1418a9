use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub encoder: EncoderConfig,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    #[serde(default)]
    pub control: ControlConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Address put into the stream URL handed to the renderer. When unset the
    /// address of the interface that routes to the renderer is used.
    #[serde(default)]
    pub advertise_host: Option<String>,

    /// How long a request for a not-yet-produced segment may wait.
    #[serde(default = "default_segment_wait_timeout")]
    pub segment_wait_timeout_ms: u64,

    /// Size of each body chunk flushed to the client.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    5000
}
fn default_segment_wait_timeout() -> u64 {
    3000
}
fn default_chunk_size() -> usize {
    8192
}

impl ServerConfig {
    pub fn segment_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.segment_wait_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            advertise_host: None,
            segment_wait_timeout_ms: default_segment_wait_timeout(),
            chunk_size: default_chunk_size(),
        }
    }
}

/// Transport the renderer is pointed at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamFormat {
    /// Live HLS playlist of MPEG-TS segments.
    #[default]
    Hls,
    /// One endless MPEG-TS response built from the same segments.
    Mpegts,
}

impl StreamFormat {
    /// Path of the resource the renderer should open.
    pub fn path(&self) -> &'static str {
        match self {
            StreamFormat::Hls => "stream.m3u8",
            StreamFormat::Mpegts => "stream.ts",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            StreamFormat::Hls => "application/vnd.apple.mpegurl",
            StreamFormat::Mpegts => "video/mp2t",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EncoderConfig {
    /// Path to ffmpeg. Looked up on `PATH` when unset.
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    #[serde(default = "default_fps")]
    pub fps: u32,

    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    #[serde(default = "default_bitrate")]
    pub bitrate_kbps: u32,

    #[serde(default = "default_segment_duration")]
    pub segment_duration_secs: f64,

    /// Must not exceed the segment duration so every segment opens on a keyframe.
    #[serde(default = "default_segment_duration")]
    pub keyframe_interval_secs: f64,

    /// Number of segments kept in the live window.
    #[serde(default = "default_retain_segments")]
    pub retain_segments: usize,

    #[serde(default = "default_preset")]
    pub preset: String,

    /// How often the encoder output is checked for finalized segments.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub format: StreamFormat,
}

fn default_fps() -> u32 {
    30
}
fn default_width() -> u32 {
    1280
}
fn default_height() -> u32 {
    720
}
fn default_bitrate() -> u32 {
    2000
}
fn default_segment_duration() -> f64 {
    0.5
}
fn default_retain_segments() -> usize {
    4
}
fn default_preset() -> String {
    "veryfast".to_string()
}
fn default_poll_interval() -> u64 {
    100
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            fps: default_fps(),
            width: default_width(),
            height: default_height(),
            bitrate_kbps: default_bitrate(),
            segment_duration_secs: default_segment_duration(),
            keyframe_interval_secs: default_segment_duration(),
            retain_segments: default_retain_segments(),
            preset: default_preset(),
            poll_interval_ms: default_poll_interval(),
            format: StreamFormat::default(),
        }
    }
}

impl EncoderConfig {
    /// Size the retention window to cover `secs` seconds of media.
    pub fn with_retention_secs(mut self, secs: f64) -> Self {
        let count = (secs / self.segment_duration_secs).ceil();
        self.retain_segments = if count.is_finite() && count >= 1.0 {
            count as usize
        } else {
            1
        };
        self
    }

    /// GOP length in frames.
    pub fn keyframe_interval_frames(&self) -> u32 {
        ((self.fps as f64 * self.keyframe_interval_secs).round() as u32).max(1)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Bytes in one packed RGB24 frame at the output resolution.
    pub fn frame_size(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoveryConfig {
    /// Where M-SEARCH requests are sent.
    #[serde(default = "default_multicast_addr")]
    pub multicast_addr: String,

    #[serde(default = "default_discovery_timeout")]
    pub timeout_ms: u64,

    /// MX header value (seconds a device may delay its answer).
    #[serde(default = "default_mx")]
    pub mx: u32,

    #[serde(default = "default_search_targets")]
    pub search_targets: Vec<String>,

    #[serde(default = "default_description_timeout")]
    pub description_timeout_ms: u64,
}

fn default_multicast_addr() -> String {
    "239.255.255.250:1900".to_string()
}
fn default_discovery_timeout() -> u64 {
    5000
}
fn default_mx() -> u32 {
    2
}
fn default_search_targets() -> Vec<String> {
    vec![
        "urn:schemas-upnp-org:device:MediaRenderer:1".to_string(),
        "urn:schemas-upnp-org:service:AVTransport:1".to_string(),
    ]
}
fn default_description_timeout() -> u64 {
    3000
}

impl DiscoveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn description_timeout(&self) -> Duration {
        Duration::from_millis(self.description_timeout_ms)
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            multicast_addr: default_multicast_addr(),
            timeout_ms: default_discovery_timeout(),
            mx: default_mx(),
            search_targets: default_search_targets(),
            description_timeout_ms: default_description_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControlConfig {
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Retries after the first attempt of a failed control command.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    #[serde(default = "default_retry_min_delay")]
    pub retry_min_delay_ms: u64,

    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_ms: u64,

    #[serde(default = "default_state_poll_interval")]
    pub state_poll_interval_ms: u64,

    /// Consecutive Stopped reports before the session treats playback as
    /// ended on the device.
    #[serde(default = "default_stopped_polls")]
    pub stopped_polls_before_exit: u32,

    /// Consecutive failed state polls before the session gives up.
    #[serde(default = "default_max_poll_failures")]
    pub max_poll_failures: u32,
}

fn default_request_timeout() -> u64 {
    10_000
}
fn default_max_retries() -> usize {
    3
}
fn default_retry_min_delay() -> u64 {
    200
}
fn default_retry_max_delay() -> u64 {
    2000
}
fn default_state_poll_interval() -> u64 {
    2000
}
fn default_stopped_polls() -> u32 {
    2
}
fn default_max_poll_failures() -> u32 {
    5
}

impl ControlConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn state_poll_interval(&self) -> Duration {
        Duration::from_millis(self.state_poll_interval_ms.max(1))
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout(),
            max_retries: default_max_retries(),
            retry_min_delay_ms: default_retry_min_delay(),
            retry_max_delay_ms: default_retry_max_delay(),
            state_poll_interval_ms: default_state_poll_interval(),
            stopped_polls_before_exit: default_stopped_polls(),
            max_poll_failures: default_max_poll_failures(),
        }
    }
}
