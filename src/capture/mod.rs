pub mod device;
pub mod error;
pub mod frame;
pub mod source;
pub mod synthetic;
pub mod v4l2;

pub use device::{open_device, CaptureDevice, FormatDescription, FrameSize, NegotiatedFormat};
pub use error::CaptureError;
pub use frame::{FourCc, Frame, PixelFormat};
pub use source::{CaptureOutcome, FrameSource};
pub use synthetic::SyntheticDevice;
pub use v4l2::V4l2Device;
