//! Core engine modules - events, player, tracking worker
//!
//! These modules form the playback engine, independent of any UI.

pub mod controller;
pub mod event_bus;
pub mod player;
pub mod player_events;
pub mod tracking;

// Re-exports for convenience
pub use controller::{PlaybackController, PlayerSnapshot};
pub use event_bus::{BoxedEvent, EventBus, EventEmitter, SubscriptionId, downcast_event};
pub use player::{ControlAvailability, PlaybackState, PlaybackStats, Player, RecordMarkers, SeekError, TickOutcome};
pub use tracking::{TickReport, TrackingWorker, WorkerStats};
