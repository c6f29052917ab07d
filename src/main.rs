//! MJPEG camera streamer: one capture thread, one HTTP session per viewer

use std::path::PathBuf;
use std::sync::Arc;

use color_eyre::{eyre::WrapErr, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mjpeg_stream::capture::{self, FrameSource};
use mjpeg_stream::{server, utils, Config, FrameStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mjpeg_stream=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("mjpeg-stream launching...");

    // Load configuration
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    let device_path = utils::resolve_device(&config.capture.device, config.capture.format)?;
    info!("Using capture device: {}", device_path);

    // Device setup failures end the process here
    let store = Arc::new(FrameStore::new());
    let device = capture::open_device(&device_path)?;
    let source = FrameSource::open(device, &config.capture, store.clone())?;
    let _capture_handle = source.spawn().wrap_err("failed to spawn capture thread")?;

    // Give the camera a moment before accepting viewers
    tokio::time::sleep(config.server.startup_grace()).await;
    if !store.has_frame() {
        warn!("No frame captured yet, starting server anyway");
    }

    let state = server::AppState::new(store, config.capture.frame_interval());
    let app = server::router(state, Some(config.server.static_dir.clone()));

    let listener = TcpListener::bind(config.server.bind)
        .await
        .wrap_err_with(|| format!("failed to bind to {}", config.server.bind))?;
    server::serve(listener, app).await.wrap_err("web server error")?;

    info!("mjpeg-stream shutting down");
    Ok(())
}
