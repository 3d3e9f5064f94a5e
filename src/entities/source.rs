//! Frame sources: anything that yields decoded frames in order.
//!
//! Format-specific decoding lives behind [`FrameSource`]; playback only sees
//! frames, end-of-stream and errors. A decode fault on one frame is reported
//! for that call only and the cursor still moves past it, so the caller can
//! skip and continue.
//!
//! # Cursor model
//!
//! A freshly opened source sits *before* frame 0 (`current_index() == None`).
//! `next()` moves to 0, 1, ... and returns `Ok(None)` at the end without
//! moving. `previous()` returns `Ok(None)` at (or before) frame 0.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::frame::Frame;

/// Source failures
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error("failed to decode frame {index}: {reason}")]
    Decode { index: u64, reason: String },
    #[error("source does not support seeking")]
    Unseekable,
    #[error("frame {0} is out of range")]
    OutOfRange(u64),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SourceError {
    /// Only single-frame decode faults may be skipped; everything else ends the stream.
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Decode { .. })
    }
}

/// Number of frames a source can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameCount {
    Bounded(u64),
    /// Live input (cameras)
    Unbounded,
}

impl fmt::Display for FrameCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameCount::Bounded(n) => write!(f, "{}", n),
            FrameCount::Unbounded => write!(f, "unbounded"),
        }
    }
}

/// What `open()` reports about a stream
#[derive(Debug, Clone, PartialEq)]
pub struct SourceInfo {
    pub name: String,
    pub frame_count: FrameCount,
    pub nominal_fps: f64,
}

/// What to open
#[derive(Debug, Clone, PartialEq)]
pub enum SourceSpec {
    Video(PathBuf),
    Images(Vec<PathBuf>),
    /// Glob pattern, e.g. `shots/cam1_*.png` (sorted by path)
    Pattern(String),
    Camera(i32),
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSpec::Video(p) => write!(f, "video {}", p.display()),
            SourceSpec::Images(paths) => write!(f, "{} image(s)", paths.len()),
            SourceSpec::Pattern(p) => write!(f, "pattern {}", p),
            SourceSpec::Camera(i) => write!(f, "camera #{}", i),
        }
    }
}

/// Decodable, ordered image sequence.
pub trait FrameSource: Send {
    fn info(&self) -> &SourceInfo;

    /// Advance one frame. `Ok(None)` at end of stream.
    fn next(&mut self) -> Result<Option<Frame>, SourceError>;

    /// Retreat one frame. `Ok(None)` at the first frame.
    fn previous(&mut self) -> Result<Option<Frame>, SourceError>;

    /// Jump to `index` (used for rewind).
    fn seek(&mut self, index: u64) -> Result<Frame, SourceError>;

    /// Last successfully produced frame
    fn current(&self) -> Option<&Frame>;

    fn current_index(&self) -> Option<u64>;

    fn frame_count(&self) -> FrameCount {
        self.info().frame_count
    }

    fn is_first(&self) -> bool {
        self.current_index().is_none_or(|i| i == 0)
    }

    fn is_last(&self) -> bool {
        match self.frame_count() {
            FrameCount::Unbounded => false,
            FrameCount::Bounded(0) => true,
            FrameCount::Bounded(n) => self.current_index().is_some_and(|i| i + 1 >= n),
        }
    }
}

/// Opens a [`SourceSpec`]. Hosts plug video/camera backends in here.
pub trait SourceOpener: Send + Sync {
    fn open(&self, spec: &SourceSpec) -> Result<Box<dyn FrameSource>, SourceError>;
}

/// Position bookkeeping shared by the built-in sources.
#[derive(Debug, Clone, Default)]
pub(crate) struct Cursor {
    position: Option<u64>,
    current: Option<Frame>,
}

impl Cursor {
    pub fn position(&self) -> Option<u64> {
        self.position
    }

    pub fn current(&self) -> Option<&Frame> {
        self.current.as_ref()
    }

    /// Index `next()` would produce, or None at end of stream
    pub fn next_index(&self, count: FrameCount) -> Option<u64> {
        let target = self.position.map_or(0, |p| p + 1);
        match count {
            FrameCount::Bounded(n) if target >= n => None,
            _ => Some(target),
        }
    }

    pub fn previous_index(&self) -> Option<u64> {
        match self.position {
            Some(p) if p > 0 => Some(p - 1),
            _ => None,
        }
    }

    /// Move to `index` and record the decode result.
    pub fn land(&mut self, index: u64, decoded: Result<Frame, SourceError>) -> Result<Frame, SourceError> {
        self.position = Some(index);
        let frame = decoded?;
        self.current = Some(frame.clone());
        Ok(frame)
    }
}

/// In-memory frame source.
///
/// Bounded mode serves prebuilt frames; unbounded mode synthesizes frames on
/// demand like a live camera (no seeking, no going back). Decode faults can
/// be injected per index.
pub struct MemorySource {
    info: SourceInfo,
    frames: Vec<Frame>,
    live_size: Option<(u32, u32)>,
    faults: BTreeSet<u64>,
    cursor: Cursor,
}

impl MemorySource {
    /// Bounded source over the given frames (re-indexed 0..n).
    pub fn new(name: impl Into<String>, frames: Vec<Frame>, nominal_fps: f64) -> Self {
        let frames: Vec<Frame> = frames
            .into_iter()
            .enumerate()
            .map(|(i, f)| f.reindexed(i as u64))
            .collect();
        Self {
            info: SourceInfo {
                name: name.into(),
                frame_count: FrameCount::Bounded(frames.len() as u64),
                nominal_fps,
            },
            frames,
            live_size: None,
            faults: BTreeSet::new(),
            cursor: Cursor::default(),
        }
    }

    /// `count` solid frames with a gray ramp, handy for tests.
    pub fn solid(count: u64, width: u32, height: u32) -> Self {
        let frames = (0..count)
            .map(|i| {
                let v = (i % 256) as u8;
                Frame::solid(i, width, height, [v, v, v, 255])
            })
            .collect();
        Self::new("memory", frames, 25.0)
    }

    /// Endless synthetic stream, behaves like a camera.
    pub fn live(width: u32, height: u32, nominal_fps: f64) -> Self {
        Self {
            info: SourceInfo {
                name: "live".to_string(),
                frame_count: FrameCount::Unbounded,
                nominal_fps,
            },
            frames: Vec::new(),
            live_size: Some((width, height)),
            faults: BTreeSet::new(),
            cursor: Cursor::default(),
        }
    }

    /// Make decoding of `index` fail.
    pub fn with_fault(mut self, index: u64) -> Self {
        self.faults.insert(index);
        self
    }

    fn decode(&self, index: u64) -> Result<Frame, SourceError> {
        if self.faults.contains(&index) {
            return Err(SourceError::Decode {
                index,
                reason: "injected fault".to_string(),
            });
        }
        if let Some((w, h)) = self.live_size {
            let v = (index % 256) as u8;
            return Ok(Frame::solid(index, w, h, [v, v, v, 255]));
        }
        self.frames
            .get(index as usize)
            .cloned()
            .ok_or(SourceError::OutOfRange(index))
    }
}

impl FrameSource for MemorySource {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn next(&mut self) -> Result<Option<Frame>, SourceError> {
        let Some(index) = self.cursor.next_index(self.info.frame_count) else {
            return Ok(None);
        };
        let decoded = self.decode(index);
        self.cursor.land(index, decoded).map(Some)
    }

    fn previous(&mut self) -> Result<Option<Frame>, SourceError> {
        if self.live_size.is_some() {
            return Ok(None);
        }
        let Some(index) = self.cursor.previous_index() else {
            return Ok(None);
        };
        let decoded = self.decode(index);
        self.cursor.land(index, decoded).map(Some)
    }

    fn seek(&mut self, index: u64) -> Result<Frame, SourceError> {
        if self.live_size.is_some() {
            return Err(SourceError::Unseekable);
        }
        if index >= self.frames.len() as u64 {
            return Err(SourceError::OutOfRange(index));
        }
        let decoded = self.decode(index);
        self.cursor.land(index, decoded)
    }

    fn current(&self) -> Option<&Frame> {
        self.cursor.current()
    }

    fn current_index(&self) -> Option<u64> {
        self.cursor.position()
    }
}
