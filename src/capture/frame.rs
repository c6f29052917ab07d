use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Frames at or below this many bytes are driver artifacts, not images
pub const MIN_FRAME_LEN: usize = 4;

/// One complete encoded image
#[derive(Clone)]
pub struct Frame {
    /// Immutable frame data - clones share the buffer, nobody can mutate it
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Capture timestamp
    pub timestamp: Instant,
}

impl Frame {
    pub fn new(data: Bytes, meta: FrameMetadata) -> Self {
        Self {
            data,
            meta: Arc::new(meta),
            timestamp: Instant::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether the payload is large enough to be a real image
    pub fn is_viable(&self) -> bool {
        self.data.len() > MIN_FRAME_LEN
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("len", &self.data.len())
            .field("meta", &self.meta)
            .finish()
    }
}

/// Frame metadata
#[derive(Debug, Clone, Default)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub fourcc: FourCc,
}

/// Four-character pixel format code as reported by the driver
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    pub const MJPG: FourCc = FourCc(*b"MJPG");
    pub const JPEG: FourCc = FourCc(*b"JPEG");
    pub const YUYV: FourCc = FourCc(*b"YUYV");
    pub const RGB3: FourCc = FourCc(*b"RGB3");
    pub const BGR3: FourCc = FourCc(*b"BGR3");
    pub const NV12: FourCc = FourCc(*b"NV12");
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({self})")
    }
}

/// Pixel formats that can be requested in the configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
    Yuyv4,
    Mjpeg,
    Nv12,
}

impl PixelFormat {
    /// Whether an advertised format is this one.
    ///
    /// Drivers disagree on naming, so MJPEG is matched by description as well
    /// as by code.
    pub fn matches(&self, fourcc: FourCc, description: &str) -> bool {
        match self {
            PixelFormat::Mjpeg => {
                fourcc == FourCc::MJPG
                    || fourcc == FourCc::JPEG
                    || description == "Motion-JPEG"
                    || description == "MJPEG"
            }
            PixelFormat::Yuyv4 => fourcc == FourCc::YUYV,
            PixelFormat::Rgb24 => fourcc == FourCc::RGB3,
            PixelFormat::Bgr24 => fourcc == FourCc::BGR3,
            PixelFormat::Nv12 => fourcc == FourCc::NV12,
        }
    }

    /// Payloads are only self-describing images when they are JPEG encoded
    pub fn is_jpeg(fourcc: FourCc) -> bool {
        fourcc == FourCc::MJPG || fourcc == FourCc::JPEG
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mjpeg_matches_by_description_or_code() {
        assert!(PixelFormat::Mjpeg.matches(FourCc(*b"XXXX"), "Motion-JPEG"));
        assert!(PixelFormat::Mjpeg.matches(FourCc(*b"XXXX"), "MJPEG"));
        assert!(PixelFormat::Mjpeg.matches(FourCc::MJPG, "Compressed"));
        assert!(!PixelFormat::Mjpeg.matches(FourCc::YUYV, "YUYV 4:2:2"));
    }

    #[test]
    fn tiny_payloads_are_not_viable() {
        let frame = Frame::new(Bytes::from_static(b"\xff\xd8\xff\xd9"), FrameMetadata::default());
        assert!(!frame.is_viable());
        let frame = Frame::new(Bytes::from_static(b"\xff\xd8\x00\xff\xd9"), FrameMetadata::default());
        assert!(frame.is_viable());
    }
}
