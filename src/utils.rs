use std::path::Path;

use color_eyre::{eyre::eyre, Result};
use tracing::{debug, info};

use crate::capture::device::{CaptureDevice, FormatDescription};
use crate::capture::frame::PixelFormat;
use crate::capture::synthetic::STUB_SCHEME;
use crate::capture::v4l2::V4l2Device;

/// Device nodes scanned by auto-detection
const SCAN_NODES: u32 = 10;

/// Turn the configured device into a path that can be opened.
///
/// Empty means auto-detect; a missing device node is an error before any
/// capture setup is attempted.
pub fn resolve_device(configured: &str, preferred: PixelFormat) -> Result<String> {
    if configured.is_empty() {
        return auto_detect_device(preferred);
    }
    if configured.starts_with(STUB_SCHEME) {
        return Ok(configured.to_string());
    }
    if !Path::new(configured).exists() {
        return Err(eyre!("Capture device {} does not exist", configured));
    }
    Ok(configured.to_string())
}

/// First `/dev/videoN` offering `preferred`, else the first capture device
pub fn auto_detect_device(preferred: PixelFormat) -> Result<String> {
    info!("Auto-detecting capture devices...");

    let candidates = (0..SCAN_NODES)
        .map(|i| format!("/dev/video{}", i))
        .filter(|path| Path::new(path).exists())
        .filter_map(|path| {
            let formats = V4l2Device::open(&path).and_then(|device| device.formats());
            match formats {
                Ok(formats) => Some((path, formats)),
                Err(e) => {
                    debug!("Skipping {}: {}", path, e);
                    None
                }
            }
        });

    pick_device(candidates, preferred).ok_or_else(|| eyre!("No suitable capture device found"))
}

/// Choose among scanned devices, in scan order
fn pick_device(
    candidates: impl IntoIterator<Item = (String, Vec<FormatDescription>)>,
    preferred: PixelFormat,
) -> Option<String> {
    let mut fallback = None;
    for (path, formats) in candidates {
        if let Some(f) = formats
            .iter()
            .find(|f| preferred.matches(f.fourcc, &f.description))
        {
            info!("Found {} device: {}", f.description, path);
            return Some(path);
        }
        if fallback.is_none() && !formats.is_empty() {
            fallback = Some(path);
        }
    }
    if let Some(path) = &fallback {
        info!("No {:?} device, falling back to {}", preferred, path);
    }
    fallback
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::FourCc;

    fn formats(list: &[(FourCc, &str)]) -> Vec<FormatDescription> {
        list.iter()
            .map(|&(fourcc, description)| FormatDescription {
                fourcc,
                description: description.into(),
            })
            .collect()
    }

    #[test]
    fn stub_paths_skip_the_existence_check() {
        assert_eq!(
            resolve_device("stub://cam", PixelFormat::Mjpeg).unwrap(),
            "stub://cam"
        );
    }

    #[test]
    fn missing_device_node_is_rejected() {
        assert!(resolve_device("/dev/definitely-not-a-camera", PixelFormat::Mjpeg).is_err());
    }

    #[test]
    fn preferred_format_beats_scan_order() {
        let candidates = vec![
            ("/dev/video0".to_string(), Vec::new()),
            ("/dev/video1".to_string(), formats(&[(FourCc::YUYV, "YUYV 4:2:2")])),
            ("/dev/video2".to_string(), formats(&[(FourCc::MJPG, "Motion-JPEG")])),
        ];
        assert_eq!(
            pick_device(candidates, PixelFormat::Mjpeg).as_deref(),
            Some("/dev/video2")
        );
    }

    #[test]
    fn falls_back_to_first_device_with_formats() {
        let candidates = vec![
            ("/dev/video0".to_string(), Vec::new()),
            ("/dev/video1".to_string(), formats(&[(FourCc::YUYV, "YUYV 4:2:2")])),
        ];
        assert_eq!(
            pick_device(candidates, PixelFormat::Mjpeg).as_deref(),
            Some("/dev/video1")
        );
        assert_eq!(pick_device(Vec::new(), PixelFormat::Mjpeg), None);
    }
}
