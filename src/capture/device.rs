//! Narrow capability interface over a capture device

use std::time::Duration;

use bytes::Bytes;

use super::error::CaptureError;
use super::frame::FourCc;
use super::synthetic::{SyntheticDevice, STUB_SCHEME};
use super::v4l2::V4l2Device;

/// A pixel format advertised by the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDescription {
    pub fourcc: FourCc,
    pub description: String,
}

/// A frame size advertised by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Sum of absolute width and height deltas
    pub fn distance(&self, target: FrameSize) -> u64 {
        u64::from(self.width.abs_diff(target.width)) + u64::from(self.height.abs_diff(target.height))
    }
}

/// Format the driver actually applied, which may differ from the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedFormat {
    pub fourcc: FourCc,
    pub width: u32,
    pub height: u32,
}

/// Everything the acquisition loop needs from a device.
///
/// `wait_for_frame` blocks until a frame is ready or `timeout` expires;
/// `read_frame` then returns that frame's bytes.
pub trait CaptureDevice: Send {
    fn formats(&self) -> Result<Vec<FormatDescription>, CaptureError>;
    fn frame_sizes(&self, fourcc: FourCc) -> Result<Vec<FrameSize>, CaptureError>;
    fn set_format(
        &mut self,
        fourcc: FourCc,
        width: u32,
        height: u32,
    ) -> Result<NegotiatedFormat, CaptureError>;
    fn set_buffer_count(&mut self, count: u32) -> Result<(), CaptureError>;
    /// Turn the stream on, waiting up to `first_frame_timeout` for a frame
    fn start_streaming(&mut self, first_frame_timeout: Duration) -> Result<(), CaptureError>;
    fn stop_streaming(&mut self) -> Result<(), CaptureError>;
    fn wait_for_frame(&mut self, timeout: Duration) -> Result<(), CaptureError>;
    fn read_frame(&mut self) -> Result<Bytes, CaptureError>;
}

impl<D: CaptureDevice + ?Sized> CaptureDevice for Box<D> {
    fn formats(&self) -> Result<Vec<FormatDescription>, CaptureError> {
        (**self).formats()
    }

    fn frame_sizes(&self, fourcc: FourCc) -> Result<Vec<FrameSize>, CaptureError> {
        (**self).frame_sizes(fourcc)
    }

    fn set_format(
        &mut self,
        fourcc: FourCc,
        width: u32,
        height: u32,
    ) -> Result<NegotiatedFormat, CaptureError> {
        (**self).set_format(fourcc, width, height)
    }

    fn set_buffer_count(&mut self, count: u32) -> Result<(), CaptureError> {
        (**self).set_buffer_count(count)
    }

    fn start_streaming(&mut self, first_frame_timeout: Duration) -> Result<(), CaptureError> {
        (**self).start_streaming(first_frame_timeout)
    }

    fn stop_streaming(&mut self) -> Result<(), CaptureError> {
        (**self).stop_streaming()
    }

    fn wait_for_frame(&mut self, timeout: Duration) -> Result<(), CaptureError> {
        (**self).wait_for_frame(timeout)
    }

    fn read_frame(&mut self) -> Result<Bytes, CaptureError> {
        (**self).read_frame()
    }
}

/// Open a device by path; `stub://` paths yield a synthetic camera
pub fn open_device(path: &str) -> Result<Box<dyn CaptureDevice>, CaptureError> {
    if path.starts_with(STUB_SCHEME) {
        Ok(Box::new(SyntheticDevice::stub()))
    } else {
        Ok(Box::new(V4l2Device::open(path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_sums_axis_deltas() {
        let target = FrameSize::new(1920, 1080);
        assert_eq!(FrameSize::new(1920, 1200).distance(target), 120);
        assert_eq!(FrameSize::new(1280, 720).distance(target), 1000);
        assert_eq!(FrameSize::new(1920, 1080).distance(target), 0);
    }

    #[test]
    fn stub_paths_open_without_hardware() {
        let device = open_device("stub://camera").unwrap();
        assert!(!device.formats().unwrap().is_empty());
    }
}
