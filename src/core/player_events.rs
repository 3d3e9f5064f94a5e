//! Playback and tracking events published on the [`EventBus`](super::EventBus).
//!
//! Presentation layers subscribe to these; nothing in the engine depends on
//! anyone listening.

use std::fmt;
use std::sync::Arc;

use image::RgbaImage;

use super::player::{ControlAvailability, PlaybackState, RecordMarkers};
use crate::entities::{FrameCount, SourceInfo};
use crate::plugin::PanelDescriptor;

// === Playback ===

#[derive(Clone, Debug, PartialEq)]
pub struct StateChangedEvent {
    pub from: PlaybackState,
    pub to: PlaybackState,
}

/// Fresh control snapshot, published after every transition.
#[derive(Clone, Debug, PartialEq)]
pub struct ControlsChangedEvent {
    pub state: PlaybackState,
    pub controls: ControlAvailability,
}

/// A frame was handed to the tracking worker.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameChangedEvent {
    pub index: u64,
    pub frame_count: FrameCount,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SourceOpenedEvent {
    pub info: SourceInfo,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RecordMarkersChangedEvent(pub RecordMarkers);

// === Notifications ===

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotifyLevel {
    Info,
    Warning,
    Error,
}

impl fmt::Display for NotifyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyLevel::Info => write!(f, "info"),
            NotifyLevel::Warning => write!(f, "warning"),
            NotifyLevel::Error => write!(f, "error"),
        }
    }
}

/// User-facing message (status bar, toast, log line).
#[derive(Clone, Debug, PartialEq)]
pub struct NotifyEvent {
    pub level: NotifyLevel,
    pub message: String,
}

impl NotifyEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self { level: NotifyLevel::Info, message: message.into() }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self { level: NotifyLevel::Warning, message: message.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { level: NotifyLevel::Error, message: message.into() }
    }
}

// === Tracking ===

/// Painted frame ready for display.
#[derive(Clone, Debug)]
pub struct OverlayEvent {
    pub frame_index: u64,
    pub overlay: Arc<RgbaImage>,
}

/// Active algorithm changed; empty panels after deactivation.
#[derive(Clone, Debug, PartialEq)]
pub struct PanelsChangedEvent {
    pub algorithm: Option<String>,
    pub tools: Option<PanelDescriptor>,
    pub params: Option<PanelDescriptor>,
}

/// The active algorithm failed; tracking is off until reactivation.
#[derive(Clone, Debug, PartialEq)]
pub struct AlgorithmFaultEvent {
    pub algorithm: String,
    pub frame: Option<u64>,
    pub error: String,
}
