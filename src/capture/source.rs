//! Frame acquisition: device setup and the capture loop

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use super::device::{CaptureDevice, FormatDescription, FrameSize, NegotiatedFormat};
use super::error::CaptureError;
use super::frame::{Frame, FrameMetadata, PixelFormat, MIN_FRAME_LEN};
use crate::store::FrameStore;
use crate::CaptureConfig;

/// Published frames per fps report
const RATE_WINDOW_FRAMES: u32 = 30;

/// Pick the preferred format, or the first one advertised
pub fn select_format(
    formats: &[FormatDescription],
    preferred: PixelFormat,
) -> Result<&FormatDescription, CaptureError> {
    formats
        .iter()
        .find(|f| preferred.matches(f.fourcc, &f.description))
        .or_else(|| formats.first())
        .ok_or(CaptureError::NoFormats)
}

/// Pick an exact match for `target`, else the nearest size by summed axis
/// deltas. Ties go to the size enumerated first.
pub fn select_frame_size(sizes: &[FrameSize], target: FrameSize) -> Option<FrameSize> {
    sizes
        .iter()
        .find(|s| **s == target)
        .or_else(|| sizes.iter().min_by_key(|s| s.distance(target)))
        .copied()
}

/// What one pass of the capture loop did
#[derive(Debug)]
pub enum CaptureOutcome {
    Published(usize),
    Discarded(usize),
    Failed(CaptureError),
}

/// Owns the device and feeds the frame store.
pub struct FrameSource<D: CaptureDevice> {
    device: D,
    store: Arc<FrameStore>,
    format: NegotiatedFormat,
    interval: Duration,
    wait_timeout: Duration,
    sequence: u64,
    window: RateWindow,
}

impl<D: CaptureDevice> FrameSource<D> {
    /// Negotiate format and resolution, allocate buffers, start streaming.
    ///
    /// Every error returned here is fatal.
    #[instrument(skip_all, fields(width = config.width, height = config.height))]
    pub fn open(
        mut device: D,
        config: &CaptureConfig,
        store: Arc<FrameStore>,
    ) -> Result<Self, CaptureError> {
        let formats = device.formats()?;
        for f in &formats {
            info!("Supported format: {} ({})", f.description, f.fourcc);
        }

        let format = select_format(&formats, config.format)?.clone();
        if !config.format.matches(format.fourcc, &format.description) {
            warn!(
                "Preferred format {:?} not offered, falling back to {}",
                config.format, format.description
            );
        }

        let sizes = device.frame_sizes(format.fourcc)?;
        for s in &sizes {
            debug!("Supported size: {}x{}", s.width, s.height);
        }

        let target = FrameSize::new(config.width, config.height);
        let size = select_frame_size(&sizes, target).ok_or(CaptureError::NoFrameSizes(format.fourcc))?;
        if size != target {
            info!(
                "No exact match for {}x{}, using nearest {}x{}",
                target.width, target.height, size.width, size.height
            );
        }
        info!(
            "Selected format {} at {}x{}",
            format.description, size.width, size.height
        );

        let negotiated = device.set_format(format.fourcc, size.width, size.height)?;
        info!(
            "Negotiated format {} at {}x{}",
            negotiated.fourcc, negotiated.width, negotiated.height
        );
        if !PixelFormat::is_jpeg(negotiated.fourcc) {
            warn!("Device delivers {}, clients expect JPEG", negotiated.fourcc);
        }

        device.set_buffer_count(config.buffer_count)?;
        device.start_streaming(config.wait_timeout())?;

        Ok(Self {
            device,
            store,
            format: negotiated,
            interval: config.frame_interval(),
            wait_timeout: config.wait_timeout(),
            sequence: 0,
            window: RateWindow::new(),
        })
    }

    pub fn format(&self) -> NegotiatedFormat {
        self.format
    }

    /// One wait/read/publish pass. Never fatal.
    pub fn capture_once(&mut self) -> CaptureOutcome {
        if let Err(e) = self.device.wait_for_frame(self.wait_timeout) {
            warn!("Waiting for frame failed: {}", e);
            metrics::counter!("capture_errors").increment(1);
            return CaptureOutcome::Failed(e);
        }

        let data = match self.device.read_frame() {
            Ok(data) => data,
            Err(e) => {
                warn!("Reading frame failed: {}", e);
                metrics::counter!("capture_errors").increment(1);
                return CaptureOutcome::Failed(e);
            }
        };

        let len = data.len();
        if len <= MIN_FRAME_LEN {
            metrics::counter!("frames_discarded").increment(1);
            return CaptureOutcome::Discarded(len);
        }

        self.sequence += 1;
        let frame = Frame::new(
            data,
            FrameMetadata {
                sequence: self.sequence,
                width: self.format.width,
                height: self.format.height,
                fourcc: self.format.fourcc,
            },
        );
        self.store.publish(frame);
        metrics::counter!("frames_captured").increment(1);

        if let Some(fps) = self.window.record() {
            info!("Capture rate: {:.2} fps, frame size: {} bytes", fps, len);
        }

        CaptureOutcome::Published(len)
    }

    /// Pause before the next pass: a full interval after a publish, none
    /// otherwise since the wait itself blocks.
    pub fn pause_after(&self, outcome: &CaptureOutcome) -> Duration {
        match outcome {
            CaptureOutcome::Published(_) => self.interval,
            CaptureOutcome::Discarded(_) | CaptureOutcome::Failed(_) => Duration::ZERO,
        }
    }

    /// Capture forever
    pub fn run(mut self) {
        info!("Capture loop running at {:?} per frame", self.interval);
        loop {
            let outcome = self.capture_once();
            let pause = self.pause_after(&outcome);
            if !pause.is_zero() {
                thread::sleep(pause);
            }
        }
    }
}

impl<D: CaptureDevice + 'static> FrameSource<D> {
    /// Run the capture loop on its own thread
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("capture".into())
            .spawn(move || self.run())
    }
}

impl<D: CaptureDevice> Drop for FrameSource<D> {
    fn drop(&mut self) {
        if let Err(e) = self.device.stop_streaming() {
            warn!("Failed to stop streaming: {}", e);
        }
    }
}

/// Counts published frames and reports the rate every window
struct RateWindow {
    frames: u32,
    started: Instant,
}

impl RateWindow {
    fn new() -> Self {
        Self {
            frames: 0,
            started: Instant::now(),
        }
    }

    fn record(&mut self) -> Option<f64> {
        self.frames += 1;
        if self.frames < RATE_WINDOW_FRAMES {
            return None;
        }
        let fps = f64::from(self.frames) / self.started.elapsed().as_secs_f64();
        self.frames = 0;
        self.started = Instant::now();
        Some(fps)
    }
}
