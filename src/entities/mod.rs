//! Entities module - data types shared by playback and tracking
//!
//! - Frames and frame sources (what playback advances through)
//! - Trajectory store, edits and the archive format (what tracking produces)
//! - Attributes and attribute keys (component metadata, plugin params)

pub mod archive;
pub mod attrs;
pub mod frame;
pub mod keys;
pub mod loader;
pub mod source;
pub mod trajectory;

pub use archive::{ARCHIVE_VERSION, LoadedArchive, SerializationError, export_csv};
pub use attrs::{AttrValue, Attrs};
pub use frame::Frame;
pub use loader::{DefaultOpener, ImageSequenceSource};
pub use source::{FrameCount, FrameSource, MemorySource, SourceError, SourceInfo, SourceOpener, SourceSpec};
pub use trajectory::{
    EditCommand, FrameScope, Geometry, ObjectId, TrackedComponent, TrackedObject, TrajectoryStore,
};
