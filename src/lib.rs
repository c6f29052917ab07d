pub mod capture;
pub mod server;
pub mod store;
pub mod stream;
pub mod utils;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use capture::frame::PixelFormat;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use capture::Frame;
pub use store::FrameStore;
pub use stream::StreamSession;

/// Config file read when no path is given on the command line
pub const DEFAULT_CONFIG_FILE: &str = "mjpeg-stream.toml";

/// Prefix for environment overrides, e.g. `MJPEG_STREAM__CAPTURE__FPS=30`
pub const ENV_PREFIX: &str = "MJPEG_STREAM";

/// Upper bound for `capture.wait_timeout_secs`
pub const MAX_WAIT_TIMEOUT_SECS: u64 = 3600;

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Device node, `stub://` for the synthetic source, or empty to auto-detect
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Preferred pixel format; the first advertised format is used if absent
    pub format: PixelFormat,
    pub buffer_count: u32,
    pub wait_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Directory holding the landing page
    pub static_dir: PathBuf,
    /// How long to wait for the first frame before the listener opens
    pub startup_grace_secs: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".into(),
            width: 1920,
            height: 1080,
            fps: 60,
            format: PixelFormat::Mjpeg,
            buffer_count: 4,
            wait_timeout_secs: 5,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            static_dir: PathBuf::from("static"),
            startup_grace_secs: 2,
        }
    }
}

impl CaptureConfig {
    /// Fixed pause between deliveries at the target rate
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.fps.max(1)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }
}

impl ServerConfig {
    pub fn startup_grace(&self) -> Duration {
        Duration::from_secs(self.startup_grace_secs)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

impl Config {
    /// Layer defaults, an optional TOML file and `MJPEG_STREAM__*` variables.
    ///
    /// An explicit `path` must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config: Config = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let capture = &self.capture;
        if capture.fps == 0 {
            return Err(ConfigError::Invalid("capture.fps must be positive"));
        }
        if capture.width == 0 || capture.height == 0 {
            return Err(ConfigError::Invalid("capture resolution must be non-zero"));
        }
        if capture.buffer_count == 0 {
            return Err(ConfigError::Invalid("capture.buffer_count must be positive"));
        }
        if capture.wait_timeout_secs == 0 || capture.wait_timeout_secs > MAX_WAIT_TIMEOUT_SECS {
            return Err(ConfigError::Invalid(
                "capture.wait_timeout_secs must be between 1 and 3600",
            ));
        }
        Ok(())
    }
}
