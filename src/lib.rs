//! trackplay - video tracking player library
//!
//! Re-exports all modules for use by the binary target.

// Core engine (events, player, tracking worker)
pub mod core;

pub mod cli;
pub mod config;
pub mod entities;
pub mod plugin;

// Re-export commonly used types from core
pub use core::event_bus::{BoxedEvent, EventBus, EventEmitter, downcast_event};
pub use core::{PlaybackController, Player, TrackingWorker};

// Re-export entities
pub use entities::{AttrValue, Attrs, Frame, TrajectoryStore};
