//! V4L2 capture device backed by memory-mapped buffers

use std::io;
use std::time::Duration;

use bytes::Bytes;
use tracing::{info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::framesize::FrameSizeEnum;
use v4l::io::traits::{CaptureStream, Stream as _};
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::device::{CaptureDevice, FormatDescription, FrameSize, NegotiatedFormat};
use super::error::CaptureError;
use super::frame::FourCc;

/// Longest wait `poll(2)` accepts in milliseconds
const MAX_POLL_TIMEOUT: Duration = Duration::from_millis(i32::MAX as u64);

/// Clamp a wait to what `poll(2)` can express
pub fn clamp_timeout(timeout: Duration) -> Duration {
    timeout.min(MAX_POLL_TIMEOUT)
}

fn poll_millis(timeout: Duration) -> i32 {
    i32::try_from(clamp_timeout(timeout).as_millis()).unwrap_or(i32::MAX)
}

/// V4L2 device handle.
///
/// `MmapStream::next` re-queues the buffer it returned last time before it
/// dequeues. A `next` that times out leaves that buffer queued, and the
/// following QBUF fails with EINVAL. So once the stream is running, `next` is
/// only called after `poll` reports a filled buffer, and a stream whose
/// first dequeue timed out is thrown away and mapped again.
pub struct V4l2Device {
    device: Box<Device>,
    path: String,
    buffer_count: u32,
    stream: Option<MmapStream<'static>>,
    streaming: bool,
    /// STREAMON happened and one buffer has been dequeued
    active: bool,
    /// Frame dequeued by `wait_for_frame`, handed out by `read_frame`
    pending: Option<Bytes>,
}

impl V4l2Device {
    #[instrument]
    pub fn open(path: &str) -> Result<Self, CaptureError> {
        let device = Device::with_path(path).map_err(|source| CaptureError::Open {
            path: path.to_string(),
            source,
        })?;

        let caps = device.query_caps().map_err(CaptureError::Enumerate)?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(CaptureError::NotCapture(path.to_string()));
        }

        Ok(Self {
            device: Box::new(device),
            path: path.to_string(),
            buffer_count: 4,
            stream: None,
            streaming: false,
            active: false,
            pending: None,
        })
    }

    /// Drop any existing stream (STREAMOFF, buffers released) and map fresh buffers
    fn map_buffers(&mut self) -> io::Result<()> {
        self.stream = None;
        self.active = false;
        let stream = MmapStream::with_buffers(&self.device, Type::VideoCapture, self.buffer_count)?;
        self.stream = Some(stream);
        Ok(())
    }

    /// Dequeue the next buffer, copying only the bytes the driver filled
    fn next_frame(&mut self) -> io::Result<Bytes> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "stream not started"))?;

        let (buf, meta) = stream.next()?;
        let used = (meta.bytesused as usize).min(buf.len());
        Ok(Bytes::copy_from_slice(&buf[..used]))
    }

    /// First dequeue on a fresh stream: queues every buffer and issues STREAMON.
    fn prime(&mut self, timeout: Duration) -> Result<(), CaptureError> {
        if self.stream.is_none() {
            self.map_buffers().map_err(CaptureError::Read)?;
        }
        if let Some(stream) = self.stream.as_mut() {
            stream.set_timeout(clamp_timeout(timeout));
        }

        match self.next_frame() {
            Ok(frame) => {
                self.active = true;
                self.pending = Some(frame);
                Ok(())
            }
            Err(e) => {
                // Buffers are still queued; only a fresh stream can start over
                self.stream = None;
                self.active = false;
                if e.kind() == io::ErrorKind::TimedOut {
                    Err(CaptureError::Timeout(timeout))
                } else {
                    Err(CaptureError::Read(e))
                }
            }
        }
    }
}

impl CaptureDevice for V4l2Device {
    fn formats(&self) -> Result<Vec<FormatDescription>, CaptureError> {
        let formats = self.device.enum_formats().map_err(CaptureError::Enumerate)?;
        Ok(formats
            .into_iter()
            .map(|desc| FormatDescription {
                fourcc: FourCc(desc.fourcc.repr),
                description: desc.description,
            })
            .collect())
    }

    fn frame_sizes(&self, fourcc: FourCc) -> Result<Vec<FrameSize>, CaptureError> {
        let sizes = self
            .device
            .enum_framesizes(FourCC::new(&fourcc.0))
            .map_err(CaptureError::Enumerate)?;

        // Stepwise ranges are represented by their largest size
        Ok(sizes
            .into_iter()
            .map(|size| match size.size {
                FrameSizeEnum::Discrete(d) => FrameSize::new(d.width, d.height),
                FrameSizeEnum::Stepwise(s) => FrameSize::new(s.max_width, s.max_height),
            })
            .collect())
    }

    fn set_format(
        &mut self,
        fourcc: FourCc,
        width: u32,
        height: u32,
    ) -> Result<NegotiatedFormat, CaptureError> {
        let negotiate = |source| CaptureError::Negotiate {
            fourcc,
            width,
            height,
            source,
        };

        let mut fmt = self.device.format().map_err(negotiate)?;
        fmt.width = width;
        fmt.height = height;
        fmt.fourcc = FourCC::new(&fourcc.0);

        let actual = self.device.set_format(&fmt).map_err(negotiate)?;
        Ok(NegotiatedFormat {
            fourcc: FourCc(actual.fourcc.repr),
            width: actual.width,
            height: actual.height,
        })
    }

    fn set_buffer_count(&mut self, count: u32) -> Result<(), CaptureError> {
        if count == 0 {
            return Err(CaptureError::Buffers {
                count,
                source: io::Error::new(io::ErrorKind::InvalidInput, "buffer count must be positive"),
            });
        }
        self.buffer_count = count;
        Ok(())
    }

    /// Map the buffers and turn the stream on.
    ///
    /// The mmap stream issues STREAMON on its first dequeue, so one frame is
    /// pulled here and kept for the first read. If none arrives in time the
    /// stream is remapped and primed again by the next `wait_for_frame`.
    fn start_streaming(&mut self, first_frame_timeout: Duration) -> Result<(), CaptureError> {
        self.map_buffers().map_err(|source| CaptureError::Buffers {
            count: self.buffer_count,
            source,
        })?;
        self.streaming = true;

        match self.prime(first_frame_timeout) {
            Ok(()) => {}
            Err(CaptureError::Timeout(_)) => {
                warn!("No frame while starting stream on {}", self.path)
            }
            Err(CaptureError::Read(e)) => {
                self.streaming = false;
                return Err(CaptureError::StreamStart(e));
            }
            Err(e) => {
                self.streaming = false;
                return Err(e);
            }
        }

        info!("Capture stream started with {} buffers", self.buffer_count);
        Ok(())
    }

    fn stop_streaming(&mut self) -> Result<(), CaptureError> {
        self.streaming = false;
        self.active = false;
        self.pending = None;
        if let Some(mut stream) = self.stream.take() {
            stream.stop().map_err(CaptureError::Read)?;
        }
        Ok(())
    }

    fn wait_for_frame(&mut self, timeout: Duration) -> Result<(), CaptureError> {
        if self.pending.is_some() {
            return Ok(());
        }
        if !self.streaming {
            return Err(CaptureError::NotStreaming);
        }
        if !self.active {
            return self.prime(timeout);
        }

        let ready = self
            .device
            .handle()
            .poll(libc::POLLIN, poll_millis(timeout))
            .map_err(CaptureError::Read)?;
        if ready == 0 {
            return Err(CaptureError::Timeout(timeout));
        }

        let frame = self.next_frame().map_err(CaptureError::Read)?;
        self.pending = Some(frame);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Bytes, CaptureError> {
        self.pending.take().ok_or_else(|| {
            CaptureError::Read(io::Error::new(
                io::ErrorKind::WouldBlock,
                "no frame dequeued",
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_fit_poll() {
        assert_eq!(poll_millis(Duration::from_secs(5)), 5_000);
        assert_eq!(poll_millis(Duration::from_secs(u64::MAX)), i32::MAX);
        assert_eq!(clamp_timeout(Duration::from_secs(10_000_000)), MAX_POLL_TIMEOUT);
        assert_eq!(clamp_timeout(Duration::from_millis(250)), Duration::from_millis(250));
    }
}
