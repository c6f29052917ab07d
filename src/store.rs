//! Single-slot holder for the latest captured frame

use std::sync::{PoisonError, RwLock};

use crate::capture::Frame;

/// Latest-frame store shared by the capture thread and every stream session.
///
/// Only the most recent frame is kept. The lock is held just long enough to
/// swap or clone the handle, never across device or network I/O.
#[derive(Default)]
pub struct FrameStore {
    latest: RwLock<Option<Frame>>,
}

impl FrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the held frame. Single writer.
    pub fn publish(&self, frame: Frame) {
        let mut latest = self.latest.write().unwrap_or_else(PoisonError::into_inner);
        *latest = Some(frame);
    }

    /// The current frame, or `None` before the first publish
    pub fn snapshot(&self) -> Option<Frame> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn has_frame(&self) -> bool {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}
