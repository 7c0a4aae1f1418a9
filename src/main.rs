mod cli;

use glasscast::{
    capture::{CaptureRegion, TestPatternBackend},
    config,
    dlna::{DiscoveryClient, RendererDescriptor},
    encoder,
    session::{Caster, SessionHandle, SessionState, SessionStatus},
};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "glasscast=trace,tower_http=debug".to_string()
        } else {
            "glasscast=debug,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt().with_env_filter(&env_filter).init();

    match cli.command {
        Commands::Discover { timeout_ms } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(discover(cli.config.as_deref(), timeout_ms))
        }
        Commands::Cast {
            renderer,
            region,
            timeout_ms,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(cast(
                cli.config.as_deref(),
                renderer.as_deref(),
                region.capture_region(),
                timeout_ms,
            ))
        }
        Commands::Serve { region, host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(serve(
                cli.config.as_deref(),
                region.capture_region(),
                host,
                port,
            ))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("glasscast {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn scan_timeout(config: &config::Config, timeout_ms: Option<u64>) -> Duration {
    timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| config.discovery.timeout())
}

async fn discover(config_path: Option<&Path>, timeout_ms: Option<u64>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let timeout = scan_timeout(&config, timeout_ms);
    let client = DiscoveryClient::new(config.discovery.clone())?;

    println!("Searching for renderers ({:.1}s)...\n", timeout.as_secs_f64());

    let mut count = 0;
    let renderers = client
        .scan_with(timeout, |renderer| {
            count += 1;
            print_renderer(count, renderer);
        })
        .await?;

    println!();
    if renderers.is_empty() {
        println!("No renderers found.");
    } else {
        println!("Found {} renderer(s).", renderers.len());
    }

    Ok(())
}

fn print_renderer(position: usize, renderer: &RendererDescriptor) {
    println!("  [{}] {}", position, renderer.friendly_name);
    println!("      id: {}", renderer.id);
    println!("      control: {}", renderer.control_url);
    if let Some(ref server) = renderer.server {
        println!("      server: {}", server);
    }
}

async fn cast(
    config_path: Option<&Path>,
    selector: Option<&str>,
    region: CaptureRegion,
    timeout_ms: Option<u64>,
) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let timeout = scan_timeout(&config, timeout_ms);

    tracing::info!("Searching for renderers");
    let client = DiscoveryClient::new(config.discovery.clone())?;
    let renderers = client.scan_nonempty(timeout).await?;
    let renderer = pick_renderer(renderers, selector)?;

    tracing::info!(
        device = %renderer.friendly_name,
        "Casting {} to {}",
        region,
        renderer.control_url
    );

    let caster = Caster::new(
        config,
        Arc::new(TestPatternBackend::new()),
        encoder::ffmpeg_factory(),
    );
    let handle = caster.start_session(region, renderer)?;
    let status = run_until_interrupted(&handle).await;

    report(&status)
}

fn pick_renderer(
    renderers: Vec<RendererDescriptor>,
    selector: Option<&str>,
) -> Result<RendererDescriptor> {
    let Some(selector) = selector else {
        if renderers.len() > 1 {
            tracing::info!(
                "{} renderers found, using the first; pass --renderer to choose",
                renderers.len()
            );
        }
        return renderers
            .into_iter()
            .next()
            .context("No renderers found");
    };

    let names: Vec<String> = renderers.iter().map(|r| r.friendly_name.clone()).collect();
    renderers
        .into_iter()
        .enumerate()
        .find(|(i, r)| r.matches(selector, *i))
        .map(|(_, r)| r)
        .with_context(|| {
            format!(
                "No renderer matches {:?} (found: {})",
                selector,
                names.join(", ")
            )
        })
}

async fn serve(
    config_path: Option<&Path>,
    region: CaptureRegion,
    host: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    // Override host/port from CLI if specified
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let caster = Caster::new(
        config,
        Arc::new(TestPatternBackend::new()),
        encoder::ffmpeg_factory(),
    );
    let handle = caster.start_preview(region)?;

    let status = handle.wait_for_state(SessionState::Encoding).await;
    if let Some(ref url) = status.stream_url {
        println!("Serving {} at {}", region, url);
        println!("Press Ctrl+C to stop.");
    }

    let status = run_until_interrupted(&handle).await;
    report(&status)
}

/// Wait for the session to end on its own or for Ctrl+C, then make sure it
/// is torn down.
async fn run_until_interrupted(handle: &SessionHandle) -> SessionStatus {
    tokio::select! {
        status = handle.wait() => status,
        _ = shutdown_signal() => {
            tracing::info!("Shutting down...");
            handle.stop().await
        }
    }
}

fn report(status: &SessionStatus) -> Result<()> {
    match status.last_error {
        Some(ref err) if status.state == SessionState::Error => {
            anyhow::bail!("Session ended with error: {}", err)
        }
        _ => {
            tracing::info!(session = %status.id, "Session {}", status.state);
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = config::load_config_or_default(config_path).unwrap_or_default();

    let all_ok = match encoder::locate_ffmpeg(&config.encoder) {
        Ok(path) => {
            let version = std::process::Command::new(&path)
                .arg("-version")
                .output()
                .ok()
                .and_then(|out| String::from_utf8(out.stdout).ok());
            print!("✓ ffmpeg");
            if let Some(ref version) = version {
                print!(" ({})", version.lines().next().unwrap_or(""));
            }
            println!(" - {}", path.display());
            true
        }
        Err(e) => {
            println!("✗ ffmpeg - {}", e);
            false
        }
    };

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Install ffmpeg to enable casting.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            println!("  Server: {}:{}", config.server.host, config.server.port);
            if let Some(ref host) = config.server.advertise_host {
                println!("  Advertised host: {}", host);
            }
            println!(
                "  Encoder: {}x{} @ {} fps, {} kbps",
                config.encoder.width,
                config.encoder.height,
                config.encoder.fps,
                config.encoder.bitrate_kbps
            );
            println!(
                "  Segments: {}s, {} retained",
                config.encoder.segment_duration_secs, config.encoder.retain_segments
            );
            println!("  Stream format: {:?}", config.encoder.format);
            println!(
                "  Discovery targets: {}",
                config.discovery.search_targets.len()
            );
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("Default config:");
            println!("  Server: {}:{}", config.server.host, config.server.port);
        }
    }

    Ok(())
}
