use opencv::{core::Mat, prelude::*};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Latest annotated frame, written by the capture loop and read by streams.
#[derive(Default)]
pub struct FrameCell {
    frame: Mutex<Option<Mat>>,
}

impl FrameCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, frame: Mat) {
        *self.frame.lock() = Some(frame);
    }

    /// Copies the latest frame out so callers never encode while holding the lock.
    pub fn latest(&self) -> Result<Option<Mat>, opencv::Error> {
        let guard = self.frame.lock();
        guard.as_ref().map(|frame| frame.try_clone()).transpose()
    }

    pub fn has_frame(&self) -> bool {
        self.frame.lock().is_some()
    }
}

/// Head count of the last processed frame. Zero until the first frame.
#[derive(Default)]
pub struct CountCell {
    count: Mutex<u32>,
}

impl CountCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, count: u32) {
        *self.count.lock() = count;
    }

    pub fn get(&self) -> u32 {
        *self.count.lock()
    }
}

#[derive(Default)]
pub struct CaptureStatus {
    camera_open: AtomicBool,
}

impl CaptureStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_camera_open(&self, open: bool) {
        self.camera_open.store(open, Ordering::SeqCst);
    }

    pub fn camera_open(&self) -> bool {
        self.camera_open.load(Ordering::SeqCst)
    }
}
