use std::io;
use std::time::Duration;

use thiserror::Error;

use super::frame::FourCc;

/// Capture failures.
///
/// Setup variants are fatal: the process cannot stream without a configured
/// device. `Timeout` and `Read` only cost the current loop iteration.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open capture device {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("device {0} does not support video capture")]
    NotCapture(String),
    #[error("device advertises no pixel formats")]
    NoFormats,
    #[error("device advertises no frame sizes for {0}")]
    NoFrameSizes(FourCc),
    #[error("failed to enumerate device capabilities: {0}")]
    Enumerate(#[source] io::Error),
    #[error("failed to set format {fourcc} {width}x{height}: {source}")]
    Negotiate {
        fourcc: FourCc,
        width: u32,
        height: u32,
        #[source]
        source: io::Error,
    },
    #[error("failed to allocate {count} capture buffers: {source}")]
    Buffers {
        count: u32,
        #[source]
        source: io::Error,
    },
    #[error("failed to start streaming: {0}")]
    StreamStart(#[source] io::Error),
    #[error("stream not started")]
    NotStreaming,
    #[error("no frame within {0:?}")]
    Timeout(Duration),
    #[error("failed to read frame: {0}")]
    Read(#[source] io::Error),
}

impl CaptureError {
    /// Whether the capture loop can keep going after this error
    pub fn is_transient(&self) -> bool {
        matches!(self, CaptureError::Timeout(_) | CaptureError::Read(_))
    }
}
