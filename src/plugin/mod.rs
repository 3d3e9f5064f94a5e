//! Tracking algorithm contract.
//!
//! An [`AlgorithmPlugin`] is driven exclusively by the tracking worker thread:
//! activation, `track()`, `paint()`, input hooks and save/load hooks never run
//! concurrently with each other. Algorithms are compiled in and looked up by
//! name through the [`PluginRegistry`].

pub mod input;
pub mod manual;
pub mod registry;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use image::RgbaImage;
use thiserror::Error;

use crate::core::event_bus::EventEmitter;
use crate::core::player_events::{NotifyEvent, NotifyLevel};
use crate::entities::{EditCommand, Frame, FrameScope, TrajectoryStore};

pub use input::{Key, KeyEvent, KeySet, Modifiers, PointerButton, PointerEvent, PointerKind};
pub use manual::ManualTracker;
pub use registry::{PluginFactory, PluginOrigin, PluginRegistry};

/// Algorithm failures. Any of them disables tracking for the session.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AlgorithmError {
    #[error("tracking failed at frame {frame}: {reason}")]
    Track { frame: u64, reason: String },
    #[error("paint failed: {0}")]
    Paint(String),
    #[error("algorithm panicked: {0}")]
    Panicked(String),
    #[error("unknown algorithm: {0}")]
    Unknown(String),
    #[error("{0}")]
    Other(String),
}

/// Kind of a panel control, with its current value.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlKind {
    Button,
    Toggle { value: bool },
    Slider { min: f64, max: f64, value: f64 },
    Text { value: String },
    Label,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControlDescriptor {
    pub id: String,
    pub label: String,
    pub kind: ControlKind,
}

/// Toolkit-neutral description of an algorithm panel.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelDescriptor {
    pub title: String,
    pub controls: Vec<ControlDescriptor>,
}

impl PanelDescriptor {
    pub fn new(title: impl Into<String>) -> Self {
        Self { title: title.into(), controls: Vec::new() }
    }

    pub fn control(mut self, id: &str, label: &str, kind: ControlKind) -> Self {
        self.controls.push(ControlDescriptor {
            id: id.to_string(),
            label: label.to_string(),
            kind,
        });
        self
    }
}

/// What input hooks may look at.
pub struct InputContext<'a> {
    /// Frame currently on display, if any
    pub frame: Option<u64>,
    pub store: &'a TrajectoryStore,
}

/// Notification handle given to a plugin at activation.
///
/// Messages are held back until the worker flushes them after the current
/// plugin call, when no store lock is held. Goes silent once the plugin is
/// deactivated.
#[derive(Debug, Clone)]
pub struct Notifier {
    emitter: EventEmitter,
    source: String,
    live: Arc<AtomicBool>,
    pending: Arc<Mutex<Vec<NotifyEvent>>>,
}

impl Notifier {
    pub(crate) fn new(emitter: EventEmitter, source: impl Into<String>) -> Self {
        Self {
            emitter,
            source: source.into(),
            live: Arc::new(AtomicBool::new(true)),
            pending: Arc::default(),
        }
    }

    pub fn notify(&self, level: NotifyLevel, message: impl AsRef<str>) {
        if !self.live.load(Ordering::Acquire) {
            return;
        }
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).push(NotifyEvent {
            level,
            message: format!("[{}] {}", self.source, message.as_ref()),
        });
    }

    /// Publish everything posted since the last flush.
    pub(crate) fn flush(&self) {
        let pending = std::mem::take(&mut *self.pending.lock().unwrap_or_else(|e| e.into_inner()));
        for event in pending {
            self.emitter.emit(event);
        }
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.notify(NotifyLevel::Info, message);
    }

    pub fn warning(&self, message: impl AsRef<str>) {
        self.notify(NotifyLevel::Warning, message);
    }

    pub(crate) fn revoke(&self) {
        self.live.store(false, Ordering::Release);
    }
}

/// Tracking algorithm.
///
/// Only `name()` and `track()` are mandatory; everything else has a neutral
/// default.
pub trait AlgorithmPlugin: Send {
    fn name(&self) -> &str;

    /// Called once, before the first `track()`.
    fn on_activate(&mut self, _notifier: Notifier) {}

    /// Process frame `frame_number`. Writes go through `scope`, which only
    /// accepts components for this frame. May take arbitrary time; playback
    /// waits for it.
    fn track(&mut self, frame_number: u64, frame: &Frame, scope: &mut FrameScope<'_>) -> Result<(), AlgorithmError>;

    /// Produce the display image for `frame`.
    fn paint(&mut self, frame: &Frame, _store: &TrajectoryStore) -> Result<RgbaImage, AlgorithmError> {
        Ok(frame.to_canvas())
    }

    /// Drop internal temporal state (user reset).
    fn reset(&mut self) {}

    /// Keys this algorithm wants. Re-queried on every key event.
    fn grabbed_keys(&self) -> KeySet {
        KeySet::new()
    }

    /// Called right before the store is written to disk.
    fn prepare_save(&mut self, _store: &TrajectoryStore) {}

    /// Called right after a store was read from disk and swapped in.
    fn post_load(&mut self, _store: &TrajectoryStore) {}

    fn tools_panel(&self) -> Option<PanelDescriptor> {
        None
    }

    fn params_panel(&self) -> Option<PanelDescriptor> {
        None
    }

    /// Grabbed key. Returned edits are queued like user edits.
    fn on_key(&mut self, _event: &KeyEvent, _ctx: &InputContext<'_>) -> Vec<EditCommand> {
        Vec::new()
    }

    /// Pointer event. Returned edits are queued like user edits.
    fn on_pointer(&mut self, _event: &PointerEvent, _ctx: &InputContext<'_>) -> Vec<EditCommand> {
        Vec::new()
    }
}
