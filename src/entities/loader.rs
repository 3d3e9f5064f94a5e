//! Still-image sequence source and the default [`SourceOpener`].
//!
//! Images are decoded lazily, one per `next()/previous()/seek()` call, with
//! the `image` crate (PNG, JPEG, TIFF, TGA, BMP). Video files and cameras
//! need a host-supplied backend; the default opener reports them as
//! unavailable.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};

use super::frame::Frame;
use super::source::{Cursor, FrameCount, FrameSource, SourceError, SourceInfo, SourceOpener, SourceSpec};

/// Ordered list of image files played as a stream.
pub struct ImageSequenceSource {
    info: SourceInfo,
    paths: Vec<PathBuf>,
    cursor: Cursor,
}

impl ImageSequenceSource {
    /// Build from explicit paths (order preserved). Fails on an empty list or missing files.
    pub fn from_paths(paths: Vec<PathBuf>, nominal_fps: f64) -> Result<Self, SourceError> {
        if paths.is_empty() {
            return Err(SourceError::Unavailable("no images given".to_string()));
        }
        if let Some(missing) = paths.iter().find(|p| !p.is_file()) {
            return Err(SourceError::Unavailable(format!(
                "image not found: {}",
                missing.display()
            )));
        }

        let name = sequence_name(&paths[0]);
        info!("Image sequence {}: {} frame(s)", name, paths.len());

        Ok(Self {
            info: SourceInfo {
                name,
                frame_count: FrameCount::Bounded(paths.len() as u64),
                nominal_fps,
            },
            paths,
            cursor: Cursor::default(),
        })
    }

    /// Build from a glob pattern; matches are sorted by path.
    pub fn from_pattern(pattern: &str, nominal_fps: f64) -> Result<Self, SourceError> {
        let entries = glob::glob(pattern)
            .map_err(|e| SourceError::Unavailable(format!("bad pattern {}: {}", pattern, e)))?;

        let mut paths: Vec<PathBuf> = entries.filter_map(Result::ok).filter(|p| p.is_file()).collect();
        paths.sort();
        debug!("Pattern {} matched {} file(s)", pattern, paths.len());

        if paths.is_empty() {
            return Err(SourceError::Unavailable(format!("no files matched {}", pattern)));
        }
        Self::from_paths(paths, nominal_fps)
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    fn decode(&self, index: u64) -> Result<Frame, SourceError> {
        let path = self
            .paths
            .get(index as usize)
            .ok_or(SourceError::OutOfRange(index))?;

        let img = image::open(path).map_err(|e| SourceError::Decode {
            index,
            reason: format!("{}: {}", path.display(), e),
        })?;

        let timestamp = if self.info.nominal_fps > 0.0 {
            Some(Duration::from_secs_f64(index as f64 / self.info.nominal_fps))
        } else {
            None
        };

        let rgba = img.to_rgba8();
        Ok(match timestamp {
            Some(ts) => Frame::with_timestamp(index, rgba, ts),
            None => Frame::new(index, rgba),
        })
    }
}

impl FrameSource for ImageSequenceSource {
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
        let Some(index) = self.cursor.previous_index() else {
            return Ok(None);
        };
        let decoded = self.decode(index);
        self.cursor.land(index, decoded).map(Some)
    }

    fn seek(&mut self, index: u64) -> Result<Frame, SourceError> {
        if index >= self.paths.len() as u64 {
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

/// Human-readable stream name from the first file ("shot_0001.png" -> "shot_")
fn sequence_name(first: &Path) -> String {
    let stem = first
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("images");
    let trimmed = stem.trim_end_matches(|c: char| c.is_ascii_digit());
    if trimmed.is_empty() {
        stem.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Opener for still images. Video and camera specs are rejected.
#[derive(Debug, Clone)]
pub struct DefaultOpener {
    /// Fps reported for image sequences (they carry no timing of their own)
    pub image_fps: f64,
}

impl DefaultOpener {
    pub fn new(image_fps: f64) -> Self {
        Self { image_fps }
    }
}

impl SourceOpener for DefaultOpener {
    fn open(&self, spec: &SourceSpec) -> Result<Box<dyn FrameSource>, SourceError> {
        match spec {
            SourceSpec::Images(paths) => {
                Ok(Box::new(ImageSequenceSource::from_paths(paths.clone(), self.image_fps)?))
            }
            SourceSpec::Pattern(pattern) => {
                Ok(Box::new(ImageSequenceSource::from_pattern(pattern, self.image_fps)?))
            }
            SourceSpec::Video(path) => Err(SourceError::Unavailable(format!(
                "no video decoder backend for {}",
                path.display()
            ))),
            SourceSpec::Camera(index) => Err(SourceError::Unavailable(format!(
                "no camera backend for device {}",
                index
            ))),
        }
    }
}
