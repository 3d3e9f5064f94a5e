//! Playback thread.
//!
//! [`PlaybackController`] owns a [`Player`] on a dedicated thread and drives
//! it: while playing it drains pending commands and then ticks; otherwise it
//! blocks on the command channel. Commands therefore always land between
//! ticks, which is what keeps algorithm swaps and source changes from
//! overlapping frame advancement.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded, unbounded};
use log::{debug, error, info};

use super::player::{ControlAvailability, PlaybackState, PlaybackStats, Player, RecordMarkers, SeekError};
use super::tracking::TrackingWorker;
use crate::entities::{FrameSource, SourceError, SourceInfo, SourceSpec};
use crate::plugin::AlgorithmPlugin;

/// Point-in-time view of the player
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSnapshot {
    pub state: PlaybackState,
    pub controls: ControlAvailability,
    pub markers: RecordMarkers,
    pub current_index: Option<u64>,
    pub source: Option<SourceInfo>,
    pub stats: PlaybackStats,
    pub target_fps: f64,
}

impl PlayerSnapshot {
    fn of(player: &Player) -> Self {
        Self {
            state: player.state(),
            controls: player.controls(),
            markers: player.markers(),
            current_index: player.current_index(),
            source: player.source_info().cloned(),
            stats: player.stats(),
            target_fps: player.target_fps(),
        }
    }
}

enum PlayerCommand {
    Open(SourceSpec, Sender<bool>),
    OpenSource(Box<dyn FrameSource>, Sender<bool>),
    Play(Sender<bool>),
    Pause(Sender<bool>),
    Stop(Sender<bool>),
    StepForward(Sender<bool>),
    StepBack(Sender<bool>),
    ToggleRecordIn(Sender<bool>),
    ToggleRecordOut(Sender<bool>),
    Seek(u64, Sender<Result<(), SeekError>>),
    SetTargetFps(f64),
    Activate(Box<dyn AlgorithmPlugin>, Option<PathBuf>, Sender<()>),
    Deactivate(Sender<()>),
    Query(Sender<PlayerSnapshot>),
    Shutdown,
}

/// Handle to the playback thread. Dropping it stops the thread.
pub struct PlaybackController {
    tx: Sender<PlayerCommand>,
    worker: Arc<TrackingWorker>,
    handle: Option<thread::JoinHandle<()>>,
}

impl PlaybackController {
    pub fn spawn(player: Player) -> Self {
        let (tx, rx) = unbounded();
        let worker = Arc::clone(player.worker());
        let handle = thread::Builder::new()
            .name("trackplay-playback".to_string())
            .spawn(move || run(player, rx));
        let handle = match handle {
            Ok(h) => Some(h),
            Err(e) => {
                error!("Failed to spawn playback thread: {}", e);
                None
            }
        };
        Self { tx, worker, handle }
    }

    /// The tracking worker frames are handed to
    pub fn worker(&self) -> &Arc<TrackingWorker> {
        &self.worker
    }

    fn request<R>(&self, build: impl FnOnce(Sender<R>) -> PlayerCommand) -> Option<R> {
        let (reply, rx) = bounded(1);
        self.tx.send(build(reply)).ok()?;
        rx.recv().ok()
    }

    fn command(&self, build: impl FnOnce(Sender<bool>) -> PlayerCommand) -> bool {
        self.request(build).unwrap_or(false)
    }

    pub fn open(&self, spec: SourceSpec) -> bool {
        self.command(|r| PlayerCommand::Open(spec, r))
    }

    pub fn open_source(&self, source: Box<dyn FrameSource>) -> bool {
        self.command(|r| PlayerCommand::OpenSource(source, r))
    }

    pub fn play(&self) -> bool {
        self.command(PlayerCommand::Play)
    }

    pub fn pause(&self) -> bool {
        self.command(PlayerCommand::Pause)
    }

    pub fn stop(&self) -> bool {
        self.command(PlayerCommand::Stop)
    }

    pub fn step_forward(&self) -> bool {
        self.command(PlayerCommand::StepForward)
    }

    pub fn step_back(&self) -> bool {
        self.command(PlayerCommand::StepBack)
    }

    pub fn toggle_record_in(&self) -> bool {
        self.command(PlayerCommand::ToggleRecordIn)
    }

    pub fn toggle_record_out(&self) -> bool {
        self.command(PlayerCommand::ToggleRecordOut)
    }

    /// Jump to a frame while paused or ready
    pub fn seek(&self, index: u64) -> Result<(), SeekError> {
        self.request(|r| PlayerCommand::Seek(index, r))
            .unwrap_or_else(|| Err(SourceError::Unavailable("playback thread is gone".to_string()).into()))
    }

    pub fn set_target_fps(&self, fps: f64) {
        let _ = self.tx.send(PlayerCommand::SetTargetFps(fps));
    }

    /// Swap algorithms at the next tick boundary; returns once active.
    pub fn activate(&self, plugin: Box<dyn AlgorithmPlugin>, archive: Option<PathBuf>) {
        self.request(|r| PlayerCommand::Activate(plugin, archive, r));
    }

    pub fn deactivate(&self) {
        self.request(PlayerCommand::Deactivate);
    }

    /// Tracking on/off. Takes effect on the next handed-off frame.
    pub fn set_tracking(&self, enabled: bool) {
        self.worker.set_tracking(enabled);
    }

    pub fn snapshot(&self) -> Option<PlayerSnapshot> {
        self.request(PlayerCommand::Query)
    }

    pub fn state(&self) -> Option<PlaybackState> {
        self.snapshot().map(|s| s.state)
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        let _ = self.tx.send(PlayerCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Playback thread panicked");
            }
        }
    }
}

fn run(mut player: Player, rx: Receiver<PlayerCommand>) {
    info!("Playback thread started");
    'outer: loop {
        if player.state() != PlaybackState::Play {
            match rx.recv() {
                Ok(cmd) => {
                    if !handle(&mut player, cmd) {
                        break;
                    }
                }
                Err(_) => break,
            }
        }

        loop {
            match rx.try_recv() {
                Ok(cmd) => {
                    if !handle(&mut player, cmd) {
                        break 'outer;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break 'outer,
            }
        }

        player.tick();
    }
    info!("Playback thread stopped");
}

/// Apply one command. Returns false on shutdown.
fn handle(player: &mut Player, cmd: PlayerCommand) -> bool {
    match cmd {
        PlayerCommand::Open(spec, r) => {
            let _ = r.send(player.open(&spec));
        }
        PlayerCommand::OpenSource(source, r) => {
            let _ = r.send(player.open_source(source));
        }
        PlayerCommand::Play(r) => {
            let _ = r.send(player.play());
        }
        PlayerCommand::Pause(r) => {
            let _ = r.send(player.pause());
        }
        PlayerCommand::Stop(r) => {
            let _ = r.send(player.stop());
        }
        PlayerCommand::StepForward(r) => {
            let _ = r.send(player.step_forward());
        }
        PlayerCommand::StepBack(r) => {
            let _ = r.send(player.step_back());
        }
        PlayerCommand::ToggleRecordIn(r) => {
            let _ = r.send(player.toggle_record_in());
        }
        PlayerCommand::ToggleRecordOut(r) => {
            let _ = r.send(player.toggle_record_out());
        }
        PlayerCommand::Seek(index, r) => {
            let _ = r.send(player.seek_to(index));
        }
        PlayerCommand::SetTargetFps(fps) => {
            player.set_target_fps(fps);
        }
        PlayerCommand::Activate(plugin, archive, r) => {
            debug!("Activating '{}' between ticks", plugin.name());
            player.activate(plugin, archive);
            let _ = r.send(());
        }
        PlayerCommand::Deactivate(r) => {
            player.deactivate();
            let _ = r.send(());
        }
        PlayerCommand::Query(r) => {
            let _ = r.send(PlayerSnapshot::of(player));
        }
        PlayerCommand::Shutdown => return false,
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::core::EventBus;
    use crate::entities::{DefaultOpener, MemorySource};
    use std::time::{Duration, Instant};

    fn controller(config: AppConfig) -> PlaybackController {
        let bus = EventBus::new();
        let worker = Arc::new(TrackingWorker::spawn(&config, bus.clone()));
        let opener = Arc::new(DefaultOpener::new(25.0));
        PlaybackController::spawn(Player::new(&config, bus, worker, opener))
    }

    fn wait_for(ctl: &PlaybackController, state: PlaybackState) -> PlayerSnapshot {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let snap = ctl.snapshot().unwrap();
            if snap.state == state || Instant::now() > deadline {
                return snap;
            }
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_plays_to_end_on_thread() {
        let ctl = controller(AppConfig { target_fps: 0.0, ..AppConfig::default() });
        assert!(!ctl.play());
        assert!(ctl.open_source(Box::new(MemorySource::solid(30, 2, 2))));
        assert!(ctl.play());

        let snap = wait_for(&ctl, PlaybackState::StreamReady);
        assert_eq!(snap.state, PlaybackState::StreamReady);
        assert_eq!(snap.current_index, Some(29));
        assert_eq!(snap.stats.frames_played, 29);
        assert!(!snap.controls.play);
    }

    #[test]
    fn test_pause_and_step_while_threaded() {
        let ctl = controller(AppConfig { target_fps: 200.0, ..AppConfig::default() });
        ctl.open_source(Box::new(MemorySource::solid(1000, 1, 1)));
        ctl.play();
        thread::sleep(Duration::from_millis(20));
        assert!(ctl.pause());

        let before = ctl.snapshot().unwrap();
        assert_eq!(before.state, PlaybackState::Pause);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(ctl.snapshot().unwrap().current_index, before.current_index);

        assert!(ctl.step_forward());
        let after = ctl.snapshot().unwrap();
        assert_eq!(after.current_index, before.current_index.map(|i| i + 1));
        assert!(ctl.stop());
        assert_eq!(ctl.snapshot().unwrap().current_index, Some(0));
    }

    #[test]
    fn test_seek_while_paused() {
        let ctl = controller(AppConfig { target_fps: 0.0, ..AppConfig::default() });
        assert!(matches!(ctl.seek(3), Err(SeekError::State(PlaybackState::Initial))));

        ctl.open_source(Box::new(MemorySource::solid(10, 1, 1)));
        ctl.seek(7).unwrap();
        let snap = ctl.snapshot().unwrap();
        assert_eq!(snap.state, PlaybackState::StreamReady);
        assert_eq!(snap.current_index, Some(7));
        assert!(matches!(ctl.seek(10), Err(SeekError::Source(SourceError::OutOfRange(10)))));
    }
}
