//! Runs the real ffmpeg encoder when it is installed.

use std::time::Duration;

use glasscast::capture::{FrameSource, TestPatternSource};
use glasscast::config::EncoderConfig;
use glasscast::encoder::{Encoder, EncoderHealth, FfmpegEncoder};

fn small_config() -> EncoderConfig {
    EncoderConfig {
        fps: 10,
        width: 160,
        height: 90,
        bitrate_kbps: 300,
        ..EncoderConfig::default()
    }
}

#[tokio::test]
async fn test_ffmpeg_produces_transport_stream_segments() {
    if which::which("ffmpeg").is_err() {
        eprintln!("Skipping: ffmpeg not found on PATH");
        return;
    }

    let config = small_config();
    let mut encoder = FfmpegEncoder::new();
    encoder.start(&config).await.expect("ffmpeg should start");
    let workdir = encoder.workdir().expect("workdir").to_path_buf();
    assert_eq!(encoder.health(), EncoderHealth::Alive);

    let mut source = TestPatternSource::new(config.width, config.height);
    let mut segments = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);

    while segments.len() < 2 && tokio::time::Instant::now() < deadline {
        let frame = source.next_frame().await.unwrap();
        encoder.feed_frame(&frame).await.unwrap();
        segments.extend(encoder.poll_new_output().await.unwrap());
        tokio::time::sleep(config.frame_interval()).await;
    }

    assert!(segments.len() >= 2, "only {} segments", segments.len());
    for segment in &segments {
        assert_eq!(segment.data[0], 0x47, "not an MPEG-TS packet");
        assert!(segment.duration_secs > 0.0 && segment.duration_secs <= 1.0);
    }

    encoder.stop().await.unwrap();
    assert_eq!(encoder.health(), EncoderHealth::Stopped);
    assert!(!workdir.exists());
}

#[tokio::test]
async fn test_ffmpeg_rejects_wrong_frame_size() {
    if which::which("ffmpeg").is_err() {
        eprintln!("Skipping: ffmpeg not found on PATH");
        return;
    }

    let config = small_config();
    let mut encoder = FfmpegEncoder::new();
    encoder.start(&config).await.unwrap();

    let mut source = TestPatternSource::new(64, 36);
    let frame = source.next_frame().await.unwrap();
    assert!(encoder.feed_frame(&frame).await.is_err());

    encoder.stop().await.unwrap();
}
