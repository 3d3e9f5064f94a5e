//! Decoded frames shared between playback, tracking and presentation.
//!
//! A `Frame` is produced once by a `FrameSource` and never mutated afterwards.
//! Pixel data sits behind an `Arc`, so cloning a frame is cheap and every
//! reader sees the same buffer.
//!
//! **Used by**: sources (producer), `Player` (handoff), `TrackingWorker`
//! (track/paint), overlay events (presentation).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use image::{Rgba, RgbaImage};

/// Single immutable RGBA8 frame with its ordinal index in the stream.
#[derive(Clone)]
pub struct Frame {
    index: u64,
    timestamp: Option<Duration>,
    image: Arc<RgbaImage>,
}

impl Frame {
    /// Wrap a decoded image as frame `index`.
    pub fn new(index: u64, image: RgbaImage) -> Self {
        Self {
            index,
            timestamp: None,
            image: Arc::new(image),
        }
    }

    /// Create frame with presentation timestamp (stream time, not wall clock)
    pub fn with_timestamp(index: u64, image: RgbaImage, timestamp: Duration) -> Self {
        Self {
            index,
            timestamp: Some(timestamp),
            image: Arc::new(image),
        }
    }

    /// Solid-color frame. Placeholder for synthetic sources and tests.
    pub fn solid(index: u64, width: u32, height: u32, rgba: [u8; 4]) -> Self {
        Self::new(index, RgbaImage::from_pixel(width, height, Rgba(rgba)))
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn timestamp(&self) -> Option<Duration> {
        self.timestamp
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Read-only pixel access
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Shared handle to the pixel buffer (no copy).
    pub fn shared_image(&self) -> Arc<RgbaImage> {
        Arc::clone(&self.image)
    }

    /// Owned copy of the pixels, the starting point for overlays.
    pub fn to_canvas(&self) -> RgbaImage {
        (*self.image).clone()
    }

    /// Same pixels under a different index
    pub fn reindexed(&self, index: u64) -> Frame {
        Frame {
            index,
            timestamp: self.timestamp,
            image: Arc::clone(&self.image),
        }
    }

    /// True if both frames share the same pixel buffer
    pub fn same_pixels(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.image, &other.image)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("index", &self.index)
            .field("timestamp", &self.timestamp)
            .field("size", &(self.width(), self.height()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_shares_pixels() {
        let frame = Frame::solid(3, 4, 2, [10, 20, 30, 255]);
        let copy = frame.clone();
        assert!(frame.same_pixels(&copy));
        assert_eq!(copy.index(), 3);
        assert_eq!((copy.width(), copy.height()), (4, 2));
    }

    #[test]
    fn test_canvas_is_detached() {
        let frame = Frame::solid(0, 2, 2, [0, 0, 0, 255]);
        let mut canvas = frame.to_canvas();
        canvas.put_pixel(0, 0, Rgba([255, 255, 255, 255]));
        assert_eq!(frame.image().get_pixel(0, 0).0, [0, 0, 0, 255]);
    }

    #[test]
    fn test_timestamp() {
        let frame = Frame::with_timestamp(7, RgbaImage::new(1, 1), Duration::from_millis(280));
        assert_eq!(frame.timestamp(), Some(Duration::from_millis(280)));
        assert_eq!(Frame::solid(0, 1, 1, [0; 4]).timestamp(), None);
    }
}
