mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config).with_context(|| format!("Invalid config file: {:?}", path))?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./glasscast.toml",
        "~/.config/glasscast/config.toml",
        "/etc/glasscast/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> crate::Result<()> {
    use crate::Error;

    if config.server.port == 0 {
        return Err(Error::Config("Server port cannot be 0".into()));
    }
    if config.server.chunk_size == 0 {
        return Err(Error::Config("Server chunk size cannot be 0".into()));
    }

    let encoder = &config.encoder;
    if encoder.fps == 0 {
        return Err(Error::Config("Encoder fps must be positive".into()));
    }
    if encoder.width == 0 || encoder.height == 0 {
        return Err(Error::Config("Encoder resolution must be positive".into()));
    }
    // yuv420p needs even dimensions
    if encoder.width % 2 != 0 || encoder.height % 2 != 0 {
        return Err(Error::Config(format!(
            "Encoder resolution {}x{} must have even dimensions",
            encoder.width, encoder.height
        )));
    }
    if !(encoder.segment_duration_secs > 0.0) {
        return Err(Error::Config("Segment duration must be positive".into()));
    }
    if !(encoder.keyframe_interval_secs > 0.0)
        || encoder.keyframe_interval_secs > encoder.segment_duration_secs
    {
        return Err(Error::Config(format!(
            "Keyframe interval {}s must be positive and not exceed segment duration {}s",
            encoder.keyframe_interval_secs, encoder.segment_duration_secs
        )));
    }
    if encoder.retain_segments == 0 {
        return Err(Error::Config("At least one segment must be retained".into()));
    }
    if encoder.bitrate_kbps == 0 {
        return Err(Error::Config("Encoder bitrate must be positive".into()));
    }

    if config
        .discovery
        .multicast_addr
        .parse::<std::net::SocketAddr>()
        .is_err()
    {
        return Err(Error::Config(format!(
            "Invalid discovery address: {}",
            config.discovery.multicast_addr
        )));
    }
    if config.discovery.search_targets.is_empty() {
        return Err(Error::Config("No discovery search targets configured".into()));
    }

    if config.control.retry_min_delay_ms > config.control.retry_max_delay_ms {
        tracing::warn!(
            "Control retry min delay {}ms exceeds max delay {}ms",
            config.control.retry_min_delay_ms,
            config.control.retry_max_delay_ms
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.encoder.segment_duration_secs, 0.5);
        assert_eq!(config.encoder.keyframe_interval_frames(), 15);
        assert_eq!(config.server.port, 5000);
    }

    #[test]
    fn keyframe_interval_longer_than_segment_is_rejected() {
        let mut config = Config::default();
        config.encoder.keyframe_interval_secs = 1.0;
        assert_matches!(validate_config(&config), Err(crate::Error::Config(_)));
    }

    #[test]
    fn odd_resolution_is_rejected() {
        let mut config = Config::default();
        config.encoder.width = 1279;
        assert_matches!(validate_config(&config), Err(crate::Error::Config(_)));
    }

    #[test]
    fn retention_from_seconds() {
        let encoder = EncoderConfig::default().with_retention_secs(4.0);
        assert_eq!(encoder.retain_segments, 8);

        let encoder = EncoderConfig::default().with_retention_secs(0.1);
        assert_eq!(encoder.retain_segments, 1);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 8090

            [encoder]
            fps = 15
            format = "mpegts"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8090);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.encoder.fps, 15);
        assert_eq!(config.encoder.format, StreamFormat::Mpegts);
        assert_eq!(config.encoder.retain_segments, 4);
        assert_eq!(config.discovery.search_targets.len(), 2);
        assert_eq!(config.control.max_retries, 3);
    }

    #[test]
    fn load_config_reports_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("glasscast.toml");
        std::fs::write(&path, "[encoder]\nretain_segments = 0\n").unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("At least one segment"));
    }
}
