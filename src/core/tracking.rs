//! Tracking worker: runs the active algorithm on its own thread.
//!
//! The playback side hands frames over with [`TrackingWorker::handoff`]:
//! - tracking active: the call blocks until `track()` and `paint()` for that
//!   frame are done (backpressure, nothing queues up)
//! - tracking inactive: the frame goes into a single-slot mailbox for display
//!   and the call returns at once (older undisplayed frames are dropped)
//!
//! All plugin calls, store writes and queued user edits happen on the worker
//! thread, one message at a time. Between two messages is a tick boundary:
//! that is where edits are applied and where algorithms are swapped.
//!
//! Key and pointer events reach the plugin through bus subscriptions owned by
//! the activation. Each activation has a generation number; input tagged
//! with an older generation is dropped, so nothing reaches a plugin after its
//! deactivation.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use log::{debug, error, info, trace, warn};

use super::event_bus::{EventBus, SubscriptionId};
use super::player_events::{AlgorithmFaultEvent, NotifyEvent, OverlayEvent, PanelsChangedEvent};
use crate::config::AppConfig;
use crate::entities::{EditCommand, Frame, SerializationError, TrajectoryStore};
use crate::plugin::{AlgorithmError, AlgorithmPlugin, InputContext, KeyEvent, Notifier, PointerEvent};

/// What happened to a frame handed off with tracking active
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub frame_index: u64,
    /// `track()` ran (false for frames at or below the frontier)
    pub tracked: bool,
    /// Set if the algorithm failed on this frame
    pub fault: Option<AlgorithmError>,
}

/// Counters for diagnostics and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub tracked: u64,
    pub displayed: u64,
    /// Mailbox frames replaced before they were displayed
    pub dropped: u64,
}

enum WorkerMsg {
    Track { frame: Frame, done: Sender<TickReport> },
    /// Mailbox holds a frame
    Display,
    Activate { plugin: Box<dyn AlgorithmPlugin>, archive: Option<PathBuf>, done: Sender<()> },
    Deactivate { done: Sender<()> },
    ApplyEdits,
    Reset { done: Sender<()> },
    NewSession { done: Sender<()> },
    Save { path: Option<PathBuf>, done: Sender<Result<PathBuf, SerializationError>> },
    Load { path: Option<PathBuf>, done: Sender<Result<usize, SerializationError>> },
    Key { generation: u64, event: KeyEvent },
    Pointer { generation: u64, event: PointerEvent },
    Barrier(Sender<()>),
    Shutdown,
}

/// State visible to both sides
struct Shared {
    store: RwLock<TrajectoryStore>,
    mailbox: Mutex<Option<Frame>>,
    edits: Mutex<VecDeque<EditCommand>>,
    tracking_enabled: AtomicBool,
    /// A plugin is active and not faulted
    plugin_ready: AtomicBool,
    active_name: RwLock<Option<String>>,
    tracked: AtomicU64,
    displayed: AtomicU64,
    dropped: AtomicU64,
    /// Worker thread gone was already reported
    gone_reported: AtomicBool,
}

impl Shared {
    fn tracking_active(&self) -> bool {
        self.tracking_enabled.load(Ordering::Acquire) && self.plugin_ready.load(Ordering::Acquire)
    }
}

/// Handle to the tracking thread. Dropping it shuts the thread down.
pub struct TrackingWorker {
    tx: Sender<WorkerMsg>,
    shared: Arc<Shared>,
    handle: Option<thread::JoinHandle<()>>,
}

impl TrackingWorker {
    /// Start the worker thread. `config.tracking_enabled` is the initial switch.
    pub fn spawn(config: &AppConfig, bus: EventBus) -> Self {
        let (tx, rx) = unbounded();
        let shared = Arc::new(Shared {
            store: RwLock::new(TrajectoryStore::new()),
            mailbox: Mutex::new(None),
            edits: Mutex::new(VecDeque::new()),
            tracking_enabled: AtomicBool::new(config.tracking_enabled),
            plugin_ready: AtomicBool::new(false),
            active_name: RwLock::new(None),
            tracked: AtomicU64::new(0),
            displayed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            gone_reported: AtomicBool::new(false),
        });

        let state = WorkerState {
            shared: Arc::clone(&shared),
            bus,
            tx: tx.clone(),
            default_archive: config.archive_path.clone(),
            active: None,
            generation: 0,
            last_frame: None,
        };

        let handle = thread::Builder::new()
            .name("trackplay-tracking".to_string())
            .spawn(move || state.run(rx));

        let handle = match handle {
            Ok(h) => Some(h),
            Err(e) => {
                error!("Failed to spawn tracking thread: {}", e);
                None
            }
        };

        Self { tx, shared, handle }
    }

    /// Hand one frame to the worker.
    ///
    /// Blocks until tracking and painting finish when tracking is active and
    /// returns the report; otherwise posts the frame for display and returns None.
    pub fn handoff(&self, frame: Frame) -> Option<TickReport> {
        if self.shared.tracking_active() {
            let (done_tx, done_rx) = bounded(1);
            let index = frame.index();
            if self.tx.send(WorkerMsg::Track { frame, done: done_tx }).is_err() {
                warn!("Tracking worker gone, frame {} not tracked", index);
                return None;
            }
            return done_rx.recv().ok();
        }

        let previous = self
            .shared
            .mailbox
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(frame);
        match previous {
            // A Display message is already pending for the slot
            Some(old) => {
                trace!("Mailbox: dropped frame {}", old.index());
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                if self.tx.send(WorkerMsg::Display).is_err() {
                    // Nobody will ever empty the slot
                    self.shared.mailbox.lock().unwrap_or_else(|e| e.into_inner()).take();
                    if !self.shared.gone_reported.swap(true, Ordering::AcqRel) {
                        warn!("Tracking worker gone, frames are no longer displayed");
                    }
                }
            }
        }
        None
    }

    /// Swap in `plugin`. Returns once the previous plugin is torn down and the
    /// new one is active.
    pub fn activate(&self, plugin: Box<dyn AlgorithmPlugin>, archive: Option<PathBuf>) {
        let (done_tx, done_rx) = bounded(1);
        if self.tx.send(WorkerMsg::Activate { plugin, archive, done: done_tx }).is_ok() {
            let _ = done_rx.recv();
        }
    }

    pub fn deactivate(&self) {
        let (done_tx, done_rx) = bounded(1);
        if self.tx.send(WorkerMsg::Deactivate { done: done_tx }).is_ok() {
            let _ = done_rx.recv();
        }
    }

    pub fn set_tracking(&self, enabled: bool) {
        self.shared.tracking_enabled.store(enabled, Ordering::Release);
        info!("Tracking {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn tracking_enabled(&self) -> bool {
        self.shared.tracking_enabled.load(Ordering::Acquire)
    }

    /// Enabled and a healthy plugin is active
    pub fn tracking_active(&self) -> bool {
        self.shared.tracking_active()
    }

    pub fn active_algorithm(&self) -> Option<String> {
        self.shared.active_name.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Queue a user edit. Applied by the worker between algorithm calls.
    pub fn submit_edit(&self, edit: EditCommand) {
        self.shared.edits.lock().unwrap_or_else(|e| e.into_inner()).push_back(edit);
        let _ = self.tx.send(WorkerMsg::ApplyEdits);
    }

    /// Algorithm reset: `plugin.reset()` and forget the tracking frontier.
    pub fn reset(&self) {
        let (done_tx, done_rx) = bounded(1);
        if self.tx.send(WorkerMsg::Reset { done: done_tx }).is_ok() {
            let _ = done_rx.recv();
        }
    }

    /// Start over for a new stream: drop all trajectories, the frontier and
    /// queued edits, and reset the algorithm's temporal state.
    pub fn new_session(&self) {
        let (done_tx, done_rx) = bounded(1);
        if self.tx.send(WorkerMsg::NewSession { done: done_tx }).is_ok() {
            let _ = done_rx.recv();
        }
    }

    /// Save the store. `None` uses the active algorithm's target, then the config default.
    pub fn save(&self, path: Option<PathBuf>) -> Result<PathBuf, SerializationError> {
        let (done_tx, done_rx) = bounded(1);
        self.tx
            .send(WorkerMsg::Save { path, done: done_tx })
            .map_err(|_| SerializationError::NoTarget)?;
        done_rx.recv().unwrap_or(Err(SerializationError::NoTarget))
    }

    /// Replace the store from an archive. On error the store is untouched.
    pub fn load(&self, path: Option<PathBuf>) -> Result<usize, SerializationError> {
        let (done_tx, done_rx) = bounded(1);
        self.tx
            .send(WorkerMsg::Load { path, done: done_tx })
            .map_err(|_| SerializationError::NoTarget)?;
        done_rx.recv().unwrap_or(Err(SerializationError::NoTarget))
    }

    /// Copy of the store as of now
    pub fn snapshot(&self) -> TrajectoryStore {
        self.shared.store.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Read the store without copying
    pub fn with_store<R>(&self, f: impl FnOnce(&TrajectoryStore) -> R) -> R {
        f(&self.shared.store.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Wait until every message sent so far is processed.
    pub fn flush(&self) {
        let (done_tx, done_rx) = bounded(1);
        if self.tx.send(WorkerMsg::Barrier(done_tx)).is_ok() {
            let _ = done_rx.recv();
        }
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            tracked: self.shared.tracked.load(Ordering::Relaxed),
            displayed: self.shared.displayed.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Drop for TrackingWorker {
    fn drop(&mut self) {
        let _ = self.tx.send(WorkerMsg::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Tracking thread panicked during shutdown");
            }
        }
    }
}

/// The active algorithm and everything tied to its activation
struct Active {
    plugin: Box<dyn AlgorithmPlugin>,
    name: String,
    generation: u64,
    archive: Option<PathBuf>,
    subscriptions: Vec<SubscriptionId>,
    notifier: Notifier,
    faulted: bool,
}

/// Worker-thread side
struct WorkerState {
    shared: Arc<Shared>,
    bus: EventBus,
    tx: Sender<WorkerMsg>,
    default_archive: Option<PathBuf>,
    active: Option<Active>,
    generation: u64,
    last_frame: Option<Frame>,
}

impl WorkerState {
    fn run(mut self, rx: Receiver<WorkerMsg>) {
        debug!("Tracking worker started");
        let result = catch_unwind(AssertUnwindSafe(|| {
            while let Ok(msg) = rx.recv() {
                if !self.handle(msg) {
                    break;
                }
            }
        }));
        // Subscriptions hold senders to our own channel
        self.teardown();
        match result {
            Ok(()) => debug!("Tracking worker stopped"),
            Err(_) => error!("Tracking worker panicked, tracking is no longer available"),
        }
    }

    /// Returns false on shutdown
    /// Publish what the plugin posted. Must run with no store lock held.
    fn flush_notifications(&self) {
        if let Some(active) = &self.active {
            active.notifier.flush();
        }
    }

    fn handle(&mut self, msg: WorkerMsg) -> bool {
        match msg {
            WorkerMsg::Track { frame, done } => {
                let report = self.process_track(frame);
                self.flush_notifications();
                let _ = done.send(report);
            }
            WorkerMsg::Display => {
                let frame = self.shared.mailbox.lock().unwrap_or_else(|e| e.into_inner()).take();
                self.apply_edits();
                if let Some(frame) = frame {
                    self.present(frame);
                }
            }
            WorkerMsg::Activate { plugin, archive, done } => {
                self.apply_edits();
                self.activate(plugin, archive);
                let _ = done.send(());
            }
            WorkerMsg::Deactivate { done } => {
                self.apply_edits();
                self.teardown();
                let _ = done.send(());
            }
            WorkerMsg::ApplyEdits => {
                if self.apply_edits() > 0 {
                    self.repaint();
                }
            }
            WorkerMsg::Reset { done } => {
                self.apply_edits();
                if let Some(active) = self.active.as_mut().filter(|a| !a.faulted) {
                    active.plugin.reset();
                }
                self.shared.store.write().unwrap_or_else(|e| e.into_inner()).reset_frontier();
                info!("Tracking reset");
                let _ = done.send(());
            }
            WorkerMsg::Save { path, done } => {
                self.apply_edits();
                let _ = done.send(self.save(path));
            }
            WorkerMsg::Load { path, done } => {
                self.apply_edits();
                let _ = done.send(self.load(path));
            }
            WorkerMsg::Key { generation, event } => self.forward_key(generation, event),
            WorkerMsg::Pointer { generation, event } => self.forward_pointer(generation, event),
            WorkerMsg::Barrier(done) => {
                self.apply_edits();
                let _ = done.send(());
            }
            WorkerMsg::NewSession { done } => {
                self.new_session();
                let _ = done.send(());
            }
            WorkerMsg::Shutdown => return false,
        }
        self.flush_notifications();
        true
    }

    fn new_session(&mut self) {
        let discarded = self.shared.edits.lock().unwrap_or_else(|e| e.into_inner()).drain(..).count();
        let reset = self
            .active
            .as_mut()
            .filter(|a| !a.faulted)
            .map(|a| catch_unwind(AssertUnwindSafe(|| a.plugin.reset())));
        self.shared.store.write().unwrap_or_else(|e| e.into_inner()).clear();
        self.last_frame = None;
        info!("New tracking session, {} queued edit(s) discarded", discarded);

        if let Some(Err(payload)) = reset {
            self.fault(None, AlgorithmError::Panicked(panic_message(payload.as_ref())));
        }
    }

    /// Drain queued user edits into the store. Returns how many were applied.
    fn apply_edits(&mut self) -> usize {
        let edits: Vec<EditCommand> = self
            .shared
            .edits
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        if edits.is_empty() {
            return 0;
        }
        let mut store = self.shared.store.write().unwrap_or_else(|e| e.into_inner());
        let applied = edits.iter().filter(|e| store.apply_edit(e)).count();
        trace!("Applied {}/{} edits", applied, edits.len());
        applied
    }

    fn process_track(&mut self, frame: Frame) -> TickReport {
        let index = frame.index();
        self.apply_edits();

        let mut report = TickReport { frame_index: index, tracked: false, fault: None };
        let needs_tracking = self.shared.store.read().unwrap_or_else(|e| e.into_inner()).needs_tracking(index);

        if let Some(active) = self.active.as_mut().filter(|a| !a.faulted) {
            if needs_tracking && self.shared.tracking_enabled.load(Ordering::Acquire) {
                let outcome = {
                    let mut store = self.shared.store.write().unwrap_or_else(|e| e.into_inner());
                    let outcome = {
                        let mut scope = store.scope(index);
                        catch_unwind(AssertUnwindSafe(|| active.plugin.track(index, &frame, &mut scope)))
                    };
                    if matches!(outcome, Ok(Ok(()))) {
                        store.advance_frontier(index);
                    }
                    outcome
                };

                match flatten_panic(outcome) {
                    Ok(()) => {
                        report.tracked = true;
                        self.shared.tracked.fetch_add(1, Ordering::Relaxed);
                        trace!("Tracked frame {}", index);
                    }
                    Err(e) => report.fault = Some(e),
                }
            } else {
                trace!("Frame {} at or below frontier, display only", index);
            }
        }

        if let Some(err) = &report.fault {
            self.fault(Some(index), err.clone());
        }

        // Edits that arrived while track() ran
        self.apply_edits();
        self.present(frame);
        report
    }

    /// Paint `frame` (raw if no healthy plugin) and publish the overlay.
    fn present(&mut self, frame: Frame) {
        let painted = match self.active.as_mut().filter(|a| !a.faulted) {
            Some(active) => {
                let store = self.shared.store.read().unwrap_or_else(|e| e.into_inner());
                flatten_panic(catch_unwind(AssertUnwindSafe(|| active.plugin.paint(&frame, &store))))
            }
            None => Ok(frame.to_canvas()),
        };

        let overlay = match painted {
            Ok(image) => Arc::new(image),
            Err(e) => {
                self.fault(Some(frame.index()), e);
                frame.shared_image()
            }
        };

        self.shared.displayed.fetch_add(1, Ordering::Relaxed);
        self.bus.emit(OverlayEvent { frame_index: frame.index(), overlay });
        self.last_frame = Some(frame);
    }

    fn repaint(&mut self) {
        if let Some(frame) = self.last_frame.clone() {
            self.present(frame);
        }
    }

    /// Quarantine the active plugin until it is reactivated.
    fn fault(&mut self, frame: Option<u64>, err: AlgorithmError) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if active.faulted {
            return;
        }
        active.faulted = true;
        self.shared.plugin_ready.store(false, Ordering::Release);

        error!("Algorithm '{}' failed: {}; tracking disabled", active.name, err);
        self.bus.emit(AlgorithmFaultEvent {
            algorithm: active.name.clone(),
            frame,
            error: err.to_string(),
        });
        self.bus.emit(NotifyEvent::error(format!(
            "{} failed ({}); tracking disabled until it is reactivated",
            active.name, err
        )));
    }

    fn activate(&mut self, mut plugin: Box<dyn AlgorithmPlugin>, archive: Option<PathBuf>) {
        // Old subscriptions go first
        self.teardown();

        self.generation += 1;
        let generation = self.generation;
        let name = plugin.name().to_string();
        let notifier = Notifier::new(self.bus.emitter(), name.clone());

        let activated = catch_unwind(AssertUnwindSafe(|| plugin.on_activate(notifier.clone())));

        let key_tx = self.tx.clone();
        let key_sub = self.bus.subscribe::<KeyEvent, _>(move |e| {
            let _ = key_tx.send(WorkerMsg::Key { generation, event: e.clone() });
        });
        let pointer_tx = self.tx.clone();
        let pointer_sub = self.bus.subscribe::<PointerEvent, _>(move |e| {
            let _ = pointer_tx.send(WorkerMsg::Pointer { generation, event: e.clone() });
        });

        let tools = plugin.tools_panel();
        let params = plugin.params_panel();
        self.active = Some(Active {
            plugin,
            name: name.clone(),
            generation,
            archive,
            subscriptions: vec![key_sub, pointer_sub],
            notifier,
            faulted: false,
        });
        *self.shared.active_name.write().unwrap_or_else(|e| e.into_inner()) = Some(name.clone());
        self.shared.plugin_ready.store(true, Ordering::Release);

        info!("Activated algorithm '{}' (generation {})", name, generation);
        self.bus.emit(PanelsChangedEvent { algorithm: Some(name), tools, params });

        if let Err(payload) = activated {
            self.fault(None, AlgorithmError::Panicked(panic_message(payload.as_ref())));
        }
        self.repaint();
    }

    /// Drop the active plugin and everything wired to it.
    fn teardown(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        for id in &active.subscriptions {
            self.bus.unsubscribe(*id);
        }
        active.notifier.flush();
        active.notifier.revoke();
        self.shared.plugin_ready.store(false, Ordering::Release);
        *self.shared.active_name.write().unwrap_or_else(|e| e.into_inner()) = None;
        // Input already queued for this generation becomes stale
        self.generation += 1;

        info!("Deactivated algorithm '{}'", active.name);
        self.bus.emit(PanelsChangedEvent { algorithm: None, tools: None, params: None });
    }

    fn target(&self, path: Option<PathBuf>) -> Result<PathBuf, SerializationError> {
        path.or_else(|| self.active.as_ref().and_then(|a| a.archive.clone()))
            .or_else(|| self.default_archive.clone())
            .ok_or(SerializationError::NoTarget)
    }

    fn save(&mut self, path: Option<PathBuf>) -> Result<PathBuf, SerializationError> {
        let path = self.target(path)?;
        let store = self.shared.store.read().unwrap_or_else(|e| e.into_inner());
        let algorithm = match self.active.as_mut() {
            Some(active) => {
                if !active.faulted {
                    let prepared = catch_unwind(AssertUnwindSafe(|| active.plugin.prepare_save(&store)));
                    if prepared.is_err() {
                        warn!("'{}' panicked in prepare_save, saving anyway", active.name);
                    }
                }
                Some(active.name.clone())
            }
            None => None,
        };

        match store.save(&path, algorithm.as_deref()) {
            Ok(()) => {
                self.bus.emit(NotifyEvent::info(format!("Saved trajectories to {}", path.display())));
                Ok(path)
            }
            Err(e) => {
                self.bus.emit(NotifyEvent::error(format!("Save failed: {}", e)));
                Err(e)
            }
        }
    }

    fn load(&mut self, path: Option<PathBuf>) -> Result<usize, SerializationError> {
        let path = self.target(path)?;
        let loaded = match TrajectoryStore::load(&path) {
            Ok(loaded) => loaded,
            Err(e) => {
                self.bus.emit(NotifyEvent::error(format!("Load failed: {}", e)));
                return Err(e);
            }
        };

        if let (Some(from), Some(active)) = (&loaded.algorithm, &self.active) {
            if *from != active.name {
                warn!("Archive was written by '{}', active algorithm is '{}'", from, active.name);
            }
        }

        let count = loaded.store.len();
        {
            let mut store = self.shared.store.write().unwrap_or_else(|e| e.into_inner());
            *store = loaded.store;
            if let Some(active) = self.active.as_mut().filter(|a| !a.faulted) {
                let store_ref: &TrajectoryStore = &store;
                if catch_unwind(AssertUnwindSafe(|| active.plugin.post_load(store_ref))).is_err() {
                    warn!("'{}' panicked in post_load", active.name);
                }
            }
        }

        self.bus.emit(NotifyEvent::info(format!("Loaded {} trajectories from {}", count, path.display())));
        self.repaint();
        Ok(count)
    }

    /// Active, healthy plugin of the given generation
    fn plugin_for(&mut self, generation: u64) -> Option<&mut Active> {
        self.active
            .as_mut()
            .filter(|a| a.generation == generation && !a.faulted)
    }

    fn forward_key(&mut self, generation: u64, event: KeyEvent) {
        let frame = self.last_frame.as_ref().map(Frame::index);
        let shared = Arc::clone(&self.shared);
        let Some(active) = self.plugin_for(generation) else {
            trace!("Dropped stale key event {:?}", event.key);
            return;
        };
        // Re-queried every time: plugins may change what they grab
        if !active.plugin.grabbed_keys().contains(&event.key) {
            return;
        }
        let edits = {
            let store = shared.store.read().unwrap_or_else(|e| e.into_inner());
            let ctx = InputContext { frame, store: &store };
            catch_unwind(AssertUnwindSafe(|| active.plugin.on_key(&event, &ctx)))
        };
        self.finish_input(edits);
    }

    fn forward_pointer(&mut self, generation: u64, event: PointerEvent) {
        let frame = self.last_frame.as_ref().map(Frame::index);
        let shared = Arc::clone(&self.shared);
        let Some(active) = self.plugin_for(generation) else {
            trace!("Dropped stale pointer event");
            return;
        };
        let edits = {
            let store = shared.store.read().unwrap_or_else(|e| e.into_inner());
            let ctx = InputContext { frame, store: &store };
            catch_unwind(AssertUnwindSafe(|| active.plugin.on_pointer(&event, &ctx)))
        };
        self.finish_input(edits);
    }

    /// Queue edits requested by an input hook and show the result.
    fn finish_input(&mut self, edits: std::thread::Result<Vec<EditCommand>>) {
        match edits {
            Ok(edits) => {
                if !edits.is_empty() {
                    self.shared.edits.lock().unwrap_or_else(|e| e.into_inner()).extend(edits);
                    self.apply_edits();
                }
                // Selection state may have changed too
                self.repaint();
            }
            Err(payload) => {
                let frame = self.last_frame.as_ref().map(Frame::index);
                self.fault(frame, AlgorithmError::Panicked(panic_message(payload.as_ref())));
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn flatten_panic<T>(result: std::thread::Result<Result<T, AlgorithmError>>) -> Result<T, AlgorithmError> {
    match result {
        Ok(inner) => inner,
        Err(payload) => Err(AlgorithmError::Panicked(panic_message(payload.as_ref()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{FrameScope, TrackedComponent};
    use crate::plugin::{Key, KeySet};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Creates one object on frame 0 and extends it on every later frame.
    struct Walker {
        calls: Arc<AtomicUsize>,
        fail_at: Option<u64>,
        panic_at: Option<u64>,
    }

    impl Walker {
        fn boxed(calls: &Arc<AtomicUsize>) -> Box<dyn AlgorithmPlugin> {
            Box::new(Walker { calls: Arc::clone(calls), fail_at: None, panic_at: None })
        }
    }

    impl AlgorithmPlugin for Walker {
        fn name(&self) -> &str {
            "walker"
        }

        fn track(&mut self, n: u64, _f: &Frame, scope: &mut FrameScope<'_>) -> Result<(), AlgorithmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_at == Some(n) {
                return Err(AlgorithmError::Track { frame: n, reason: "lost lock".into() });
            }
            if self.panic_at == Some(n) {
                panic!("walker exploded");
            }
            match scope.store().ids().first().copied() {
                Some(id) => {
                    scope.push_component(id, TrackedComponent::point(n as f32, 0.0));
                }
                None => {
                    scope.create_object(TrackedComponent::point(n as f32, 0.0));
                }
            }
            Ok(())
        }

        fn grabbed_keys(&self) -> KeySet {
            [Key::Space].into_iter().collect()
        }

        fn on_key(&mut self, _e: &KeyEvent, ctx: &InputContext<'_>) -> Vec<EditCommand> {
            vec![EditCommand::AddTrajectory { frame: ctx.frame.unwrap_or(0), x: 1.0, y: 1.0 }]
        }
    }

    fn frame(i: u64) -> Frame {
        Frame::solid(i, 4, 4, [0, 0, 0, 255])
    }

    #[test]
    fn test_tracking_blocks_and_writes() {
        let worker = TrackingWorker::spawn(&AppConfig::default(), EventBus::new());
        let calls = Arc::new(AtomicUsize::new(0));
        worker.activate(Walker::boxed(&calls), None);
        assert!(worker.tracking_active());

        for i in 0..3 {
            let report = worker.handoff(frame(i)).unwrap();
            assert!(report.tracked);
            // Blocking handoff: track() already ran
            assert_eq!(calls.load(Ordering::SeqCst), i as usize + 1);
        }

        let store = worker.snapshot();
        assert_eq!(store.len(), 1);
        assert_eq!(store.objects().next().unwrap().frames.len(), 3);
        assert_eq!(store.frontier(), Some(2));
    }

    #[test]
    fn test_frontier_revisits_are_display_only() {
        let worker = TrackingWorker::spawn(&AppConfig::default(), EventBus::new());
        let calls = Arc::new(AtomicUsize::new(0));
        worker.activate(Walker::boxed(&calls), None);

        worker.handoff(frame(0));
        worker.handoff(frame(1));
        let report = worker.handoff(frame(0)).unwrap();
        assert!(!report.tracked);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        worker.reset();
        assert!(worker.handoff(frame(1)).unwrap().tracked);
    }

    #[test]
    fn test_disabled_tracking_uses_mailbox() {
        let config = AppConfig { tracking_enabled: false, ..AppConfig::default() };
        let bus = EventBus::new();
        let overlays = Arc::new(AtomicUsize::new(0));
        let o = Arc::clone(&overlays);
        bus.subscribe::<OverlayEvent, _>(move |_| {
            o.fetch_add(1, Ordering::SeqCst);
        });

        let worker = TrackingWorker::spawn(&config, bus);
        let calls = Arc::new(AtomicUsize::new(0));
        worker.activate(Walker::boxed(&calls), None);

        for i in 0..20 {
            assert!(worker.handoff(frame(i)).is_none());
        }
        worker.flush();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let stats = worker.stats();
        assert_eq!(stats.displayed + stats.dropped, 20);
        assert_eq!(overlays.load(Ordering::SeqCst) as u64, stats.displayed);
    }

    #[test]
    fn test_fault_disables_tracking() {
        let bus = EventBus::new();
        let worker = TrackingWorker::spawn(&AppConfig::default(), bus.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        worker.activate(
            Box::new(Walker { calls: Arc::clone(&calls), fail_at: None, panic_at: Some(1) }),
            None,
        );

        assert!(worker.handoff(frame(0)).unwrap().tracked);
        let report = worker.handoff(frame(1)).unwrap();
        assert!(matches!(report.fault, Some(AlgorithmError::Panicked(_))));
        assert!(!worker.tracking_active());

        // Display continues without tracking
        assert!(worker.handoff(frame(2)).is_none());
        worker.flush();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let faults = bus
            .poll()
            .iter()
            .filter(|e| crate::core::event_bus::downcast_event::<AlgorithmFaultEvent>(e).is_some())
            .count();
        assert_eq!(faults, 1);

        // Reactivation clears the fault
        worker.activate(Walker::boxed(&calls), None);
        assert!(worker.handoff(frame(3)).unwrap().tracked);
    }

    #[test]
    fn test_error_return_is_a_fault() {
        let worker = TrackingWorker::spawn(&AppConfig::default(), EventBus::new());
        let calls = Arc::new(AtomicUsize::new(0));
        worker.activate(
            Box::new(Walker { calls: Arc::clone(&calls), fail_at: Some(0), panic_at: None }),
            None,
        );
        let report = worker.handoff(frame(0)).unwrap();
        assert_eq!(report.fault, Some(AlgorithmError::Track { frame: 0, reason: "lost lock".into() }));
        assert_eq!(worker.snapshot().frontier(), None);
    }

    #[test]
    fn test_edits_and_key_forwarding() {
        let bus = EventBus::new();
        let worker = TrackingWorker::spawn(&AppConfig::default(), bus.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        worker.activate(Walker::boxed(&calls), None);
        worker.handoff(frame(0));

        worker.submit_edit(EditCommand::AddTrajectory { frame: 0, x: 5.0, y: 5.0 });
        worker.flush();
        assert_eq!(worker.snapshot().len(), 2);

        // Not grabbed: ignored
        bus.emit(KeyEvent::press(Key::Enter));
        // Grabbed: plugin adds a trajectory
        bus.emit(KeyEvent::press(Key::Space));
        worker.flush();
        assert_eq!(worker.snapshot().len(), 3);

        worker.deactivate();
        bus.emit(KeyEvent::press(Key::Space));
        worker.flush();
        assert_eq!(worker.snapshot().len(), 3);
        assert!(!bus.has_subscribers::<KeyEvent>());
    }

    #[test]
    fn test_save_load_through_worker() {
        let path = std::env::temp_dir().join("trackplay_test_worker_archive.json");
        let worker = TrackingWorker::spawn(&AppConfig::default(), EventBus::new());
        assert!(matches!(worker.save(None), Err(SerializationError::NoTarget)));

        let calls = Arc::new(AtomicUsize::new(0));
        worker.activate(Walker::boxed(&calls), Some(path.clone()));
        worker.handoff(frame(0));
        worker.handoff(frame(1));
        assert_eq!(worker.save(None).unwrap(), path);
        let saved = worker.snapshot();

        worker.submit_edit(EditCommand::AddTrajectory { frame: 1, x: 0.0, y: 0.0 });
        worker.flush();
        assert_eq!(worker.snapshot().len(), 2);

        assert_eq!(worker.load(None).unwrap(), 1);
        assert_eq!(worker.snapshot(), saved);

        // Broken archive: store untouched
        std::fs::write(&path, "{ broken").unwrap();
        assert!(worker.load(None).is_err());
        assert_eq!(worker.snapshot(), saved);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_drop_joins_thread() {
        let worker = TrackingWorker::spawn(&AppConfig::default(), EventBus::new());
        worker.handoff(frame(0));
        let start = std::time::Instant::now();
        drop(worker);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    /// Reports every tracked frame through its notifier.
    struct Chatty {
        notifier: Option<Notifier>,
    }

    impl AlgorithmPlugin for Chatty {
        fn name(&self) -> &str {
            "chatty"
        }

        fn on_activate(&mut self, notifier: Notifier) {
            self.notifier = Some(notifier);
        }

        fn track(&mut self, n: u64, _f: &Frame, scope: &mut FrameScope<'_>) -> Result<(), AlgorithmError> {
            scope.create_object(TrackedComponent::point(0.0, 0.0));
            if let Some(notifier) = &self.notifier {
                notifier.info(format!("tracked {}", n));
            }
            Ok(())
        }
    }

    #[test]
    fn test_notify_subscriber_may_read_store() {
        let bus = EventBus::new();
        let worker = Arc::new(TrackingWorker::spawn(&AppConfig::default(), bus.clone()));
        let sizes: Arc<Mutex<Vec<usize>>> = Arc::default();

        let weak = Arc::downgrade(&worker);
        let s = Arc::clone(&sizes);
        bus.subscribe::<NotifyEvent, _>(move |_| {
            if let Some(worker) = weak.upgrade() {
                s.lock().unwrap().push(worker.snapshot().len());
            }
        });
        worker.activate(Box::new(Chatty { notifier: None }), None);

        let (done_tx, done_rx) = bounded(1);
        let w = Arc::clone(&worker);
        thread::spawn(move || {
            w.handoff(frame(0));
            w.handoff(frame(1));
            let _ = done_tx.send(());
        });
        assert!(done_rx.recv_timeout(Duration::from_secs(5)).is_ok(), "handoff stuck");

        worker.flush();
        assert_eq!(*sizes.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_new_session_forgets_previous_stream() {
        let worker = TrackingWorker::spawn(&AppConfig::default(), EventBus::new());
        let calls = Arc::new(AtomicUsize::new(0));
        worker.activate(Walker::boxed(&calls), None);
        for i in 0..5 {
            worker.handoff(frame(i));
        }
        worker.new_session();
        let store = worker.snapshot();
        assert!(store.is_empty());
        assert_eq!(store.frontier(), None);

        // Same frame numbers are tracked again
        assert!(worker.handoff(frame(0)).unwrap().tracked);
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert_eq!(worker.snapshot().len(), 1);
    }

    #[test]
    fn test_dead_worker_does_not_hold_frames() {
        let (tx, rx) = unbounded();
        drop(rx);
        let shared = Arc::new(Shared {
            store: RwLock::new(TrajectoryStore::new()),
            mailbox: Mutex::new(None),
            edits: Mutex::new(VecDeque::new()),
            tracking_enabled: AtomicBool::new(true),
            plugin_ready: AtomicBool::new(false),
            active_name: RwLock::new(None),
            tracked: AtomicU64::new(0),
            displayed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            gone_reported: AtomicBool::new(false),
        });
        let worker = TrackingWorker { tx, shared, handle: None };

        for i in 0..3 {
            assert!(worker.handoff(frame(i)).is_none());
        }
        assert_eq!(worker.stats().dropped, 0);
        assert!(worker.shared.mailbox.lock().unwrap().is_none());
        assert!(worker.shared.gone_reported.load(Ordering::SeqCst));
    }
}
