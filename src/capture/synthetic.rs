//! Synthetic capture device for `stub://` paths and tests

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

use super::device::{CaptureDevice, FormatDescription, FrameSize, NegotiatedFormat};
use super::error::CaptureError;
use super::frame::FourCc;

pub const STUB_SCHEME: &str = "stub://";

/// One scripted result of a `wait_for_frame` + `read_frame` pair
#[derive(Debug, Clone)]
pub enum SyntheticEvent {
    Frame(Bytes),
    Timeout,
    ReadError,
}

/// Which setup step should fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupFailure {
    Negotiate,
    Buffers,
    StreamStart,
}

/// In-memory camera.
///
/// Plays back scripted events first, then generates small JPEG-framed
/// payloads with an incrementing counter.
pub struct SyntheticDevice {
    formats: Vec<FormatDescription>,
    sizes: Vec<FrameSize>,
    script: VecDeque<SyntheticEvent>,
    fail: Option<SetupFailure>,
    /// Overrides the negotiated size, as drivers are free to do
    negotiated_size: Option<FrameSize>,
    streaming: bool,
    pending: Option<Result<Bytes, ()>>,
    generated: u64,
}

impl SyntheticDevice {
    pub fn new(formats: Vec<FormatDescription>, sizes: Vec<FrameSize>) -> Self {
        Self {
            formats,
            sizes,
            script: VecDeque::new(),
            fail: None,
            negotiated_size: None,
            streaming: false,
            pending: None,
            generated: 0,
        }
    }

    /// MJPEG and YUYV camera with a few common sizes
    pub fn stub() -> Self {
        Self::new(
            vec![
                FormatDescription {
                    fourcc: FourCc::YUYV,
                    description: "YUYV 4:2:2".into(),
                },
                FormatDescription {
                    fourcc: FourCc::MJPG,
                    description: "Motion-JPEG".into(),
                },
            ],
            vec![
                FrameSize::new(640, 480),
                FrameSize::new(1280, 720),
                FrameSize::new(1920, 1080),
            ],
        )
    }

    pub fn with_script(mut self, events: impl IntoIterator<Item = SyntheticEvent>) -> Self {
        self.script.extend(events);
        self
    }

    pub fn failing_at(mut self, step: SetupFailure) -> Self {
        self.fail = Some(step);
        self
    }

    pub fn negotiating(mut self, size: FrameSize) -> Self {
        self.negotiated_size = Some(size);
        self
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    fn setup_error(&self, step: SetupFailure) -> Option<io::Error> {
        (self.fail == Some(step)).then(|| io::Error::new(io::ErrorKind::Other, "synthetic failure"))
    }

    /// SOI marker, big-endian counter, EOI marker
    fn generate(&mut self) -> Bytes {
        self.generated += 1;
        let mut buf = BytesMut::with_capacity(12);
        buf.put_slice(&[0xFF, 0xD8]);
        buf.put_u64(self.generated);
        buf.put_slice(&[0xFF, 0xD9]);
        buf.freeze()
    }
}

impl CaptureDevice for SyntheticDevice {
    fn formats(&self) -> Result<Vec<FormatDescription>, CaptureError> {
        Ok(self.formats.clone())
    }

    fn frame_sizes(&self, fourcc: FourCc) -> Result<Vec<FrameSize>, CaptureError> {
        if self.formats.iter().any(|f| f.fourcc == fourcc) {
            Ok(self.sizes.clone())
        } else {
            Ok(Vec::new())
        }
    }

    fn set_format(
        &mut self,
        fourcc: FourCc,
        width: u32,
        height: u32,
    ) -> Result<NegotiatedFormat, CaptureError> {
        if let Some(source) = self.setup_error(SetupFailure::Negotiate) {
            return Err(CaptureError::Negotiate {
                fourcc,
                width,
                height,
                source,
            });
        }
        let size = self.negotiated_size.unwrap_or(FrameSize::new(width, height));
        Ok(NegotiatedFormat {
            fourcc,
            width: size.width,
            height: size.height,
        })
    }

    fn set_buffer_count(&mut self, count: u32) -> Result<(), CaptureError> {
        match self.setup_error(SetupFailure::Buffers) {
            Some(source) => Err(CaptureError::Buffers { count, source }),
            None => Ok(()),
        }
    }

    fn start_streaming(&mut self, _first_frame_timeout: Duration) -> Result<(), CaptureError> {
        if let Some(source) = self.setup_error(SetupFailure::StreamStart) {
            return Err(CaptureError::StreamStart(source));
        }
        self.streaming = true;
        Ok(())
    }

    fn stop_streaming(&mut self) -> Result<(), CaptureError> {
        self.streaming = false;
        self.pending = None;
        Ok(())
    }

    fn wait_for_frame(&mut self, timeout: Duration) -> Result<(), CaptureError> {
        if !self.streaming {
            return Err(CaptureError::NotStreaming);
        }
        match self.script.pop_front() {
            Some(SyntheticEvent::Timeout) => Err(CaptureError::Timeout(timeout)),
            Some(SyntheticEvent::Frame(data)) => {
                self.pending = Some(Ok(data));
                Ok(())
            }
            Some(SyntheticEvent::ReadError) => {
                self.pending = Some(Err(()));
                Ok(())
            }
            None => {
                let data = self.generate();
                self.pending = Some(Ok(data));
                Ok(())
            }
        }
    }

    fn read_frame(&mut self) -> Result<Bytes, CaptureError> {
        match self.pending.take() {
            Some(Ok(data)) => Ok(data),
            Some(Err(())) => Err(CaptureError::Read(io::Error::new(
                io::ErrorKind::Other,
                "synthetic read failure",
            ))),
            None => Err(CaptureError::Read(io::Error::new(
                io::ErrorKind::WouldBlock,
                "no frame dequeued",
            ))),
        }
    }
}
