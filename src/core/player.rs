//! Playback state machine with fps pacing.
//!
//! **Architecture**: Player is passive. It owns the open [`FrameSource`] and
//! the playback state; something else (the `PlaybackController` thread, or a
//! test) calls the command methods and `tick()`. Every advanced frame is
//! handed to the [`TrackingWorker`]; with tracking active that call blocks
//! until the algorithm is done with the frame.
//!
//! # States
//!
//! ```text
//! Initial ──open──> StreamReady <──rewind── Stop
//!                    │   ^  │                ^
//!                  play  │ stop──────────────┤
//!                    v   │end                │
//!                    Play ──────stop─────────┤
//!                   │  ^                     │
//!              pause│  │play                 │
//!                   v  │                     │
//!                   Pause ─────stop──────────┘
//!                   │  ^
//!    step fwd/back  v  │ one frame later
//!           StepForward / StepBack
//! ```
//!
//! Playback never loops: reaching the last frame returns to `StreamReady`.
//!
//! # Pacing
//!
//! Each Play tick measures `dt` since the previous tick started. With
//! `target_fps > 0` and `dt < period` it sleeps `period - dt - epsilon`.
//! There is no drift compensation. A tick that starts later than
//! `period + epsilon` counts as a pacing violation (logged at debug, one
//! notification per play run). Targets that are not finite are rejected;
//! a period too long to represent disables pacing.
//!
//! # Streams
//!
//! Opening a stream over a previous one starts a new tracking session: the
//! worker drops the old trajectories and frontier so the new frames are
//! tracked from scratch. Save the archive first to keep them.

use std::fmt;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, trace, warn};
use thiserror::Error;

use super::event_bus::EventBus;
use super::player_events::{
    ControlsChangedEvent, FrameChangedEvent, NotifyEvent, RecordMarkersChangedEvent, SourceOpenedEvent,
    StateChangedEvent,
};
use super::tracking::TrackingWorker;
use crate::config::AppConfig;
use crate::entities::{Frame, FrameCount, FrameSource, SourceError, SourceInfo, SourceOpener, SourceSpec};
use crate::plugin::AlgorithmPlugin;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaybackState {
    Initial,
    StreamReady,
    Play,
    Pause,
    Stop,
    StepForward,
    StepBack,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaybackState::Initial => "initial",
            PlaybackState::StreamReady => "stream-ready",
            PlaybackState::Play => "play",
            PlaybackState::Pause => "pause",
            PlaybackState::Stop => "stop",
            PlaybackState::StepForward => "step-forward",
            PlaybackState::StepBack => "step-back",
        };
        write!(f, "{}", name)
    }
}

impl PlaybackState {
    /// Legal transitions
    pub fn can_transition(self, to: PlaybackState) -> bool {
        use PlaybackState::*;
        matches!(
            (self, to),
            (Initial, StreamReady)
                | (Stop, StreamReady)
                | (StreamReady, Play)
                | (StreamReady, Stop)
                | (Play, StreamReady)
                | (Play, Pause)
                | (Play, Stop)
                | (Pause, Play)
                | (Pause, Stop)
                | (Pause, StepForward)
                | (Pause, StepBack)
                | (StepForward, Pause)
                | (StepBack, Pause)
                // Fatal source error while stepping
                | (StepForward, Stop)
                | (StepBack, Stop)
        )
    }
}

/// Which commands are valid right now. Output only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlAvailability {
    pub play: bool,
    pub pause: bool,
    pub stop: bool,
    pub step_forward: bool,
    pub step_back: bool,
    pub record_in: bool,
    pub record_out: bool,
}

/// Record-in/out markers: the frame at which each was switched on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordMarkers {
    pub record_in: Option<u64>,
    pub record_out: Option<u64>,
}

impl RecordMarkers {
    /// Inclusive range when both markers are set
    pub fn range(&self) -> Option<RangeInclusive<u64>> {
        let (a, b) = (self.record_in?, self.record_out?);
        Some(a.min(b)..=a.max(b))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlaybackStats {
    /// Frames handed to the worker during Play ticks
    pub frames_played: u64,
    /// Undecodable frames skipped
    pub frames_skipped: u64,
    pub pacing_violations: u64,
    /// Longest gap between tick starts
    pub max_tick_interval: Duration,
    /// Smoothed rate of the current play run (0 until two ticks ran)
    pub measured_fps: f64,
}

/// Weight of the newest tick interval in `measured_fps`
const FPS_SMOOTHING: f64 = 0.2;

/// Why `seek_to` did not move
#[derive(Debug, Error)]
pub enum SeekError {
    #[error("cannot seek in state {0}")]
    State(PlaybackState),
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// What one `tick()` did
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Not playing
    Idle,
    Advanced(u64),
    /// Decode error on this index, skipped
    Skipped(u64),
    /// Stream exhausted, back in StreamReady
    Ended,
    /// Fatal source error, playback stopped
    Failed(String),
}

/// Playback state machine (passive: driven by its owner)
pub struct Player {
    state: PlaybackState,
    source: Option<Box<dyn FrameSource>>,
    opener: Arc<dyn SourceOpener>,
    worker: Arc<TrackingWorker>,
    bus: EventBus,
    target_fps: f64,
    epsilon: Duration,
    skip_decode_errors: bool,
    markers: RecordMarkers,
    stats: PlaybackStats,
    last_tick_start: Option<Instant>,
    violation_notified: bool,
}

impl Player {
    pub fn new(config: &AppConfig, bus: EventBus, worker: Arc<TrackingWorker>, opener: Arc<dyn SourceOpener>) -> Self {
        let target_fps = if config.target_fps.is_finite() {
            config.target_fps
        } else {
            warn!("Ignoring target fps {}, playing unpaced", config.target_fps);
            0.0
        };
        info!("Player initialized: target {} fps", target_fps);
        Self {
            state: PlaybackState::Initial,
            source: None,
            opener,
            worker,
            bus,
            target_fps,
            epsilon: config.pacing_epsilon(),
            skip_decode_errors: config.skip_decode_errors,
            markers: RecordMarkers::default(),
            stats: PlaybackStats::default(),
            last_tick_start: None,
            violation_notified: false,
        }
    }

    // ========== Queries ==========

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn worker(&self) -> &Arc<TrackingWorker> {
        &self.worker
    }

    pub fn source_info(&self) -> Option<&SourceInfo> {
        self.source.as_ref().map(|s| s.info())
    }

    pub fn current_index(&self) -> Option<u64> {
        self.source.as_ref().and_then(|s| s.current_index())
    }

    pub fn current_frame(&self) -> Option<&Frame> {
        self.source.as_ref().and_then(|s| s.current())
    }

    pub fn target_fps(&self) -> f64 {
        self.target_fps
    }

    pub fn markers(&self) -> RecordMarkers {
        self.markers
    }

    pub fn record_range(&self) -> Option<RangeInclusive<u64>> {
        self.markers.range()
    }

    pub fn stats(&self) -> PlaybackStats {
        self.stats
    }

    fn is_last(&self) -> bool {
        self.source.as_ref().is_none_or(|s| s.is_last())
    }

    fn is_first(&self) -> bool {
        self.source.as_ref().is_none_or(|s| s.is_first())
    }

    /// Snapshot of valid commands for the current state
    pub fn controls(&self) -> ControlAvailability {
        use PlaybackState::*;
        let markers = matches!(self.state, StreamReady | Play | Pause);
        let mut c = ControlAvailability {
            record_in: markers,
            record_out: markers,
            ..Default::default()
        };
        match self.state {
            StreamReady => {
                c.play = !self.is_last();
                c.stop = true;
            }
            Play => {
                c.pause = true;
                c.stop = true;
            }
            Pause => {
                c.play = !self.is_last();
                c.stop = true;
                c.step_forward = !self.is_last();
                c.step_back = !self.is_first();
            }
            Initial | Stop | StepForward | StepBack => {}
        }
        c
    }

    // ========== Commands ==========

    /// Open a new stream. On failure nothing changes and false is returned.
    pub fn open(&mut self, spec: &SourceSpec) -> bool {
        match self.opener.open(spec) {
            Ok(source) => self.open_source(source),
            Err(e) => {
                warn!("Cannot open {}: {}", spec, e);
                self.bus.emit(NotifyEvent::error(format!("Cannot open {}: {}", spec, e)));
                false
            }
        }
    }

    /// Install an already opened source. Reads its first frame before
    /// touching any state, so a bad source leaves the previous one in place.
    pub fn open_source(&mut self, mut source: Box<dyn FrameSource>) -> bool {
        use PlaybackState::*;
        if !matches!(self.state, Initial | Stop | StreamReady | Play | Pause) {
            warn!("Open rejected in state {}", self.state);
            return false;
        }

        let first = match self.read_first(source.as_mut()) {
            Ok(frame) => frame,
            Err(e) => {
                let name = source.info().name.clone();
                warn!("Cannot open {}: {}", name, e);
                self.bus.emit(NotifyEvent::error(format!("Cannot open {}: {}", name, e)));
                return false;
            }
        };

        // Close the running stream only now that the new one works
        if matches!(self.state, StreamReady | Play | Pause) {
            self.transition(Stop);
        }

        let info = source.info().clone();
        info!(
            "Opened {}: {} frames at {} fps",
            info.name, info.frame_count, info.nominal_fps
        );
        let replacing = self.source.replace(source).is_some();
        if replacing {
            self.worker.new_session();
        }
        self.set_markers(RecordMarkers::default());
        self.bus.emit(SourceOpenedEvent { info });
        self.hand_off(first);
        self.transition(StreamReady);
        true
    }

    /// First decodable frame, honoring the skip policy
    fn read_first(&mut self, source: &mut dyn FrameSource) -> Result<Frame, SourceError> {
        loop {
            match source.next() {
                Ok(Some(frame)) => return Ok(frame),
                Ok(None) => return Err(SourceError::Unavailable("stream has no frames".to_string())),
                Err(e) if e.is_transient() && self.skip_decode_errors => {
                    warn!("Skipping undecodable frame while opening: {}", e);
                    self.stats.frames_skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn play(&mut self) -> bool {
        if !self.controls().play {
            debug!("Play rejected in state {}", self.state);
            return false;
        }
        self.last_tick_start = None;
        self.violation_notified = false;
        self.stats.measured_fps = 0.0;
        self.transition(PlaybackState::Play)
    }

    pub fn pause(&mut self) -> bool {
        if !self.controls().pause {
            debug!("Pause rejected in state {}", self.state);
            return false;
        }
        self.transition(PlaybackState::Pause)
    }

    /// Stop and rewind to frame 0.
    pub fn stop(&mut self) -> bool {
        if !self.controls().stop {
            debug!("Stop rejected in state {}", self.state);
            return false;
        }
        self.transition(PlaybackState::Stop);
        self.rewind();
        true
    }

    pub fn step_forward(&mut self) -> bool {
        if !self.controls().step_forward {
            debug!("Step forward rejected in state {}", self.state);
            return false;
        }
        self.transition(PlaybackState::StepForward);
        let result = match self.source.as_mut() {
            Some(source) => source.next(),
            None => Ok(None),
        };
        self.finish_step(result)
    }

    pub fn step_back(&mut self) -> bool {
        if !self.controls().step_back {
            debug!("Step back rejected in state {}", self.state);
            return false;
        }
        self.transition(PlaybackState::StepBack);
        let result = match self.source.as_mut() {
            Some(source) => source.previous(),
            None => Ok(None),
        };
        self.finish_step(result)
    }

    fn finish_step(&mut self, result: Result<Option<Frame>, SourceError>) -> bool {
        match result {
            Ok(Some(frame)) => self.hand_off(frame),
            Ok(None) => {}
            Err(e) if e.is_transient() => {
                // Cursor moved past the bad frame; nothing to show
                warn!("Step: {}", e);
                self.bus.emit(NotifyEvent::warning(e.to_string()));
            }
            Err(e) => {
                self.fail(e);
                return true;
            }
        }
        self.transition(PlaybackState::Pause);
        true
    }

    pub fn toggle_record_in(&mut self) -> bool {
        if !self.controls().record_in {
            return false;
        }
        let markers = RecordMarkers {
            record_in: match self.markers.record_in {
                Some(_) => None,
                None => Some(self.current_index().unwrap_or(0)),
            },
            ..self.markers
        };
        self.set_markers(markers);
        true
    }

    pub fn toggle_record_out(&mut self) -> bool {
        if !self.controls().record_out {
            return false;
        }
        let markers = RecordMarkers {
            record_out: match self.markers.record_out {
                Some(_) => None,
                None => Some(self.current_index().unwrap_or(0)),
            },
            ..self.markers
        };
        self.set_markers(markers);
        true
    }

    fn set_markers(&mut self, markers: RecordMarkers) {
        if markers != self.markers {
            self.markers = markers;
            debug!("Record markers: {:?}", markers);
            self.bus.emit(RecordMarkersChangedEvent(markers));
        }
    }

    /// New pacing target; <= 0 disables pacing. Takes effect on the next tick.
    /// NaN and infinities are rejected.
    pub fn set_target_fps(&mut self, fps: f64) -> bool {
        if !fps.is_finite() {
            warn!("Rejected target fps {}", fps);
            return false;
        }
        info!("Target fps: {} -> {}", self.target_fps, fps);
        self.target_fps = fps;
        true
    }

    /// Jump to `index` and hand that frame off. Valid in StreamReady and
    /// Pause; the state does not change. Frames at or below the tracking
    /// frontier are only displayed.
    pub fn seek_to(&mut self, index: u64) -> Result<(), SeekError> {
        use PlaybackState::*;
        if !matches!(self.state, StreamReady | Pause) {
            debug!("Seek rejected in state {}", self.state);
            return Err(SeekError::State(self.state));
        }
        let Some(source) = self.source.as_mut() else {
            return Err(SeekError::State(self.state));
        };

        match source.seek(index) {
            Ok(frame) => {
                debug!("Seek to {}", index);
                self.hand_off(frame);
                self.publish_controls();
                Ok(())
            }
            Err(e) => {
                warn!("Seek to {} failed: {}", index, e);
                if e.is_transient() {
                    // Cursor is on the bad frame now
                    self.bus.emit(NotifyEvent::warning(e.to_string()));
                    self.publish_controls();
                }
                Err(e.into())
            }
        }
    }

    /// Swap the tracking algorithm. The caller runs between ticks, so the
    /// swap never overlaps frame advancement.
    pub fn activate(&mut self, plugin: Box<dyn AlgorithmPlugin>, archive: Option<std::path::PathBuf>) {
        self.worker.activate(plugin, archive);
    }

    pub fn deactivate(&mut self) {
        self.worker.deactivate();
    }

    // ========== Timing loop ==========

    /// Advance one frame if playing, after pacing.
    pub fn tick(&mut self) -> TickOutcome {
        if self.state != PlaybackState::Play {
            return TickOutcome::Idle;
        }

        self.pace();
        let now = Instant::now();
        if let Some(last) = self.last_tick_start {
            self.measure(now - last);
        }
        self.last_tick_start = Some(now);

        let result = match self.source.as_mut() {
            Some(source) => source.next(),
            None => Ok(None),
        };

        match result {
            Ok(Some(frame)) => {
                let index = frame.index();
                self.stats.frames_played += 1;
                self.hand_off(frame);
                self.end_if_last();
                TickOutcome::Advanced(index)
            }
            Ok(None) => {
                self.transition(PlaybackState::StreamReady);
                TickOutcome::Ended
            }
            Err(e) if e.is_transient() && self.skip_decode_errors => {
                let index = self.current_index().unwrap_or(0);
                warn!("Skipping frame {}: {}", index, e);
                self.stats.frames_skipped += 1;
                self.bus.emit(NotifyEvent::warning(format!("Skipped frame {}: {}", index, e)));
                self.end_if_last();
                TickOutcome::Skipped(index)
            }
            Err(e) => {
                let message = e.to_string();
                self.fail(e);
                TickOutcome::Failed(message)
            }
        }
    }

    /// Sleep so that consecutive ticks start about one period apart.
    fn pace(&mut self) {
        let Some(last) = self.last_tick_start else {
            return;
        };
        let dt = last.elapsed();
        if dt > self.stats.max_tick_interval {
            self.stats.max_tick_interval = dt;
        }
        if self.target_fps <= 0.0 {
            return;
        }

        let Ok(period) = Duration::try_from_secs_f64(1.0 / self.target_fps) else {
            trace!("Period for {} fps not representable, unpaced", self.target_fps);
            return;
        };
        if dt < period {
            let wait = (period - dt).saturating_sub(self.epsilon);
            trace!("Pacing: dt={:?} wait={:?}", dt, wait);
            if !wait.is_zero() {
                thread::sleep(wait);
            }
        } else if dt > period.saturating_add(self.epsilon) {
            self.stats.pacing_violations += 1;
            debug!("Pacing violation: tick interval {:?} > period {:?}", dt, period);
            if !self.violation_notified {
                self.violation_notified = true;
                self.bus.emit(NotifyEvent::info(format!(
                    "Playback slower than {} fps (frame took {} ms)",
                    self.target_fps,
                    dt.as_millis()
                )));
            }
        }
    }

    fn measure(&mut self, interval: Duration) {
        let secs = interval.as_secs_f64();
        if secs <= 0.0 {
            return;
        }
        let fps = 1.0 / secs;
        let stats = &mut self.stats;
        stats.measured_fps = if stats.measured_fps == 0.0 {
            fps
        } else {
            FPS_SMOOTHING * fps + (1.0 - FPS_SMOOTHING) * stats.measured_fps
        };
    }

    fn end_if_last(&mut self) {
        if self.is_last() {
            info!("End of stream");
            self.transition(PlaybackState::StreamReady);
        }
    }

    /// Fatal source error: Stop, surface it, then try to rewind.
    fn fail(&mut self, e: SourceError) {
        error!("Source error: {}", e);
        self.bus.emit(NotifyEvent::error(format!("Playback stopped: {}", e)));
        self.transition(PlaybackState::Stop);
        self.rewind();
    }

    /// Seek back to frame 0 and leave Stop. Stays in Stop if the source is broken.
    fn rewind(&mut self) {
        let Some(source) = self.source.as_mut() else {
            return;
        };
        match source.seek(0) {
            Ok(frame) => self.hand_off(frame),
            Err(SourceError::Unseekable) => debug!("Source is not seekable, staying on current frame"),
            Err(e) if e.is_transient() => {
                warn!("Rewind: {}", e);
                self.bus.emit(NotifyEvent::warning(e.to_string()));
            }
            Err(e) => {
                error!("Rewind failed: {}", e);
                self.bus.emit(NotifyEvent::error(format!("Rewind failed: {}", e)));
                return;
            }
        }
        self.transition(PlaybackState::StreamReady);
    }

    fn hand_off(&mut self, frame: Frame) {
        let index = frame.index();
        let frame_count = self
            .source
            .as_ref()
            .map(|s| s.frame_count())
            .unwrap_or(FrameCount::Bounded(0));
        if let Some(report) = self.worker.handoff(frame) {
            trace!("Frame {} handed off: {:?}", index, report);
        }
        self.bus.emit(FrameChangedEvent { index, frame_count });
    }

    /// Validate and apply a state change, then publish it.
    fn transition(&mut self, to: PlaybackState) -> bool {
        let from = self.state;
        if !from.can_transition(to) {
            warn!("Illegal transition {} -> {} ignored", from, to);
            return false;
        }
        self.state = to;
        debug!("State: {} -> {}", from, to);
        self.bus.emit(StateChangedEvent { from, to });
        self.publish_controls();
        true
    }

    fn publish_controls(&self) {
        self.bus.emit(ControlsChangedEvent { state: self.state, controls: self.controls() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{DefaultOpener, MemorySource};
    use std::sync::Mutex;

    fn player_with(config: AppConfig) -> (Player, EventBus) {
        let bus = EventBus::new();
        let worker = Arc::new(TrackingWorker::spawn(&config, bus.clone()));
        let opener = Arc::new(DefaultOpener::new(config.default_source_fps));
        (Player::new(&config, bus.clone(), worker, opener), bus)
    }

    fn fast() -> AppConfig {
        AppConfig { target_fps: 0.0, ..AppConfig::default() }
    }

    #[test]
    fn test_initial_controls_all_off() {
        let (player, _) = player_with(fast());
        assert_eq!(player.state(), PlaybackState::Initial);
        assert_eq!(player.controls(), ControlAvailability::default());
    }

    #[test]
    fn test_open_play_to_end() {
        let (mut player, _) = player_with(fast());
        assert!(player.open_source(Box::new(MemorySource::solid(3, 2, 2))));
        assert_eq!(player.state(), PlaybackState::StreamReady);
        assert_eq!(player.current_index(), Some(0));

        assert!(player.play());
        assert_eq!(player.tick(), TickOutcome::Advanced(1));
        assert_eq!(player.tick(), TickOutcome::Advanced(2));
        // No auto-replay
        assert_eq!(player.state(), PlaybackState::StreamReady);
        assert_eq!(player.tick(), TickOutcome::Idle);
        assert!(!player.controls().play);
        assert!(!player.play());
    }

    #[test]
    fn test_stop_rewinds() {
        let (mut player, bus) = player_with(fast());
        player.open_source(Box::new(MemorySource::solid(5, 1, 1)));
        player.play();
        player.tick();
        player.tick();
        bus.poll();

        assert!(player.stop());
        assert_eq!(player.state(), PlaybackState::StreamReady);
        assert_eq!(player.current_index(), Some(0));

        let transitions: Vec<(PlaybackState, PlaybackState)> = bus
            .poll()
            .iter()
            .filter_map(|e| crate::core::event_bus::downcast_event::<StateChangedEvent>(e))
            .map(|e| (e.from, e.to))
            .collect();
        assert_eq!(
            transitions,
            vec![
                (PlaybackState::Play, PlaybackState::Stop),
                (PlaybackState::Stop, PlaybackState::StreamReady)
            ]
        );
    }

    #[test]
    fn test_stepping() {
        let (mut player, _) = player_with(fast());
        player.open_source(Box::new(MemorySource::solid(3, 1, 1)));
        // Stepping needs Pause
        assert!(!player.step_forward());
        player.play();
        player.pause();
        assert_eq!(player.state(), PlaybackState::Pause);
        assert!(!player.controls().step_back);

        assert!(player.step_forward());
        assert_eq!(player.state(), PlaybackState::Pause);
        assert_eq!(player.current_index(), Some(1));
        assert!(player.step_back());
        assert_eq!(player.current_index(), Some(0));
        assert!(player.step_forward());
        assert!(player.step_forward());
        assert!(!player.controls().step_forward);
        assert!(!player.controls().play);
    }

    #[test]
    fn test_failed_open_keeps_stream() {
        let (mut player, bus) = player_with(fast());
        player.open_source(Box::new(MemorySource::solid(4, 1, 1)));
        player.play();
        player.tick();
        bus.poll();

        assert!(!player.open(&SourceSpec::Camera(3)));
        assert!(!player.open_source(Box::new(MemorySource::new("empty", Vec::new(), 25.0))));
        assert_eq!(player.state(), PlaybackState::Play);
        assert_eq!(player.current_index(), Some(1));
        assert_eq!(player.source_info().map(|i| i.name.as_str()), Some("memory"));

        let notes = bus
            .poll()
            .iter()
            .filter(|e| crate::core::event_bus::downcast_event::<NotifyEvent>(e).is_some())
            .count();
        assert_eq!(notes, 2);
    }

    #[test]
    fn test_reopen_while_playing() {
        let (mut player, _) = player_with(fast());
        player.open_source(Box::new(MemorySource::solid(4, 1, 1)));
        player.play();
        player.tick();
        assert!(player.open_source(Box::new(MemorySource::solid(2, 1, 1))));
        assert_eq!(player.state(), PlaybackState::StreamReady);
        assert_eq!(player.current_index(), Some(0));
        assert_eq!(player.source_info().map(|i| i.frame_count), Some(FrameCount::Bounded(2)));
    }

    #[test]
    fn test_decode_errors_skipped_or_fatal() {
        let (mut player, _) = player_with(fast());
        player.open_source(Box::new(MemorySource::solid(4, 1, 1).with_fault(2)));
        player.play();
        assert_eq!(player.tick(), TickOutcome::Advanced(1));
        assert_eq!(player.tick(), TickOutcome::Skipped(2));
        assert_eq!(player.tick(), TickOutcome::Advanced(3));
        assert_eq!(player.stats().frames_skipped, 1);

        let strict = AppConfig { skip_decode_errors: false, ..fast() };
        let (mut player, _) = player_with(strict);
        player.open_source(Box::new(MemorySource::solid(4, 1, 1).with_fault(2)));
        player.play();
        player.tick();
        assert!(matches!(player.tick(), TickOutcome::Failed(_)));
        // Stop, then rewound
        assert_eq!(player.state(), PlaybackState::StreamReady);
        assert_eq!(player.current_index(), Some(0));
    }

    #[test]
    fn test_live_source_stop_stays_put() {
        let (mut player, _) = player_with(fast());
        player.open_source(Box::new(MemorySource::live(2, 2, 30.0)));
        player.play();
        for _ in 0..5 {
            player.tick();
        }
        assert!(player.stop());
        assert_eq!(player.state(), PlaybackState::StreamReady);
        assert_eq!(player.current_index(), Some(5));
    }

    #[test]
    fn test_record_markers() {
        let (mut player, bus) = player_with(fast());
        assert!(!player.toggle_record_in());

        player.open_source(Box::new(MemorySource::solid(10, 1, 1)));
        player.play();
        player.tick();
        assert!(player.toggle_record_in());
        player.tick();
        player.tick();
        assert!(player.toggle_record_out());
        assert_eq!(player.record_range(), Some(1..=3));

        let seen: Arc<Mutex<Vec<RecordMarkers>>> = Arc::default();
        let s = Arc::clone(&seen);
        bus.subscribe::<RecordMarkersChangedEvent, _>(move |e| s.lock().unwrap().push(e.0));
        assert!(player.toggle_record_in());
        assert_eq!(player.record_range(), None);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_pacing_and_violation_count() {
        let config = AppConfig { target_fps: 50.0, ..AppConfig::default() };
        let (mut player, _) = player_with(config);
        player.open_source(Box::new(MemorySource::solid(10, 1, 1)));
        player.play();

        let start = Instant::now();
        for _ in 0..4 {
            player.tick();
        }
        // 3 paced gaps of ~20 ms minus epsilon
        assert!(start.elapsed() >= Duration::from_millis(40));

        thread::sleep(Duration::from_millis(60));
        player.tick();
        assert_eq!(player.stats().pacing_violations, 1);
    }

    #[test]
    fn test_non_finite_fps_never_panics() {
        let (mut player, _) = player_with(AppConfig { target_fps: f64::NAN, ..AppConfig::default() });
        assert_eq!(player.target_fps(), 0.0);
        player.open_source(Box::new(MemorySource::solid(20, 1, 1)));
        player.play();
        player.tick();

        assert!(!player.set_target_fps(f64::NAN));
        assert!(!player.set_target_fps(f64::INFINITY));
        assert_eq!(player.target_fps(), 0.0);

        // Period overflows a Duration: pacing is skipped
        assert!(player.set_target_fps(1e-300));
        for _ in 0..3 {
            assert!(matches!(player.tick(), TickOutcome::Advanced(_)));
        }
        assert_eq!(player.stats().pacing_violations, 0);
    }

    #[test]
    fn test_seek_to() {
        let (mut player, bus) = player_with(fast());
        assert!(matches!(player.seek_to(1), Err(SeekError::State(PlaybackState::Initial))));

        player.open_source(Box::new(MemorySource::solid(8, 1, 1).with_fault(6)));
        player.seek_to(7).unwrap();
        assert_eq!(player.state(), PlaybackState::StreamReady);
        assert_eq!(player.current_index(), Some(7));
        assert!(!player.controls().play);

        bus.poll();
        player.seek_to(2).unwrap();
        assert!(player.play());
        assert!(matches!(player.seek_to(0), Err(SeekError::State(PlaybackState::Play))));
        player.pause();
        player.seek_to(4).unwrap();
        assert_eq!(player.state(), PlaybackState::Pause);
        assert_eq!(player.current_index(), Some(4));
        assert!(bus.poll().iter().any(|e| {
            crate::core::event_bus::downcast_event::<FrameChangedEvent>(e).is_some_and(|f| f.index == 4)
        }));

        assert!(matches!(player.seek_to(8), Err(SeekError::Source(SourceError::OutOfRange(8)))));
        assert!(matches!(player.seek_to(6), Err(SeekError::Source(SourceError::Decode { index: 6, .. }))));
        assert_eq!(player.state(), PlaybackState::Pause);

        let (mut live, _) = player_with(fast());
        live.open_source(Box::new(MemorySource::live(1, 1, 30.0)));
        assert!(matches!(live.seek_to(0), Err(SeekError::Source(SourceError::Unseekable))));
    }

    #[test]
    fn test_measured_fps() {
        let config = AppConfig { target_fps: 50.0, ..AppConfig::default() };
        let (mut player, _) = player_with(config);
        player.open_source(Box::new(MemorySource::solid(30, 1, 1)));
        player.play();
        player.tick();
        assert_eq!(player.stats().measured_fps, 0.0);

        for _ in 0..10 {
            player.tick();
        }
        let fps = player.stats().measured_fps;
        // Gaps run up to epsilon short of 20 ms
        assert!(fps > 30.0 && fps < 90.0, "measured {}", fps);

        // Each play run starts over
        player.pause();
        player.play();
        assert_eq!(player.stats().measured_fps, 0.0);
    }
}
