//! Trajectory store: per-object, per-frame geometry history.
//!
//! Written only on the tracking thread. The active algorithm writes through a
//! [`FrameScope`] bound to the frame being tracked, so it can look at any
//! history but only append components for that one frame. User edits
//! ([`EditCommand`]) are the only path that touches past frames and are
//! applied by the worker between algorithm calls.
//!
//! The store also carries the tracking *frontier*: the highest frame already
//! passed to `track()`. Frames at or below it are display-only.

use std::collections::BTreeMap;
use std::fmt;

use indexmap::IndexMap;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::attrs::{AttrValue, Attrs};
use super::keys::A_USER_EDIT;

/// Stable object identity within a session and across save/load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Area descriptor of one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Geometry {
    Point { x: f32, y: f32 },
    Rect { x: f32, y: f32, width: f32, height: f32 },
    Polygon { points: Vec<[f32; 2]> },
}

impl Geometry {
    pub fn kind(&self) -> &'static str {
        match self {
            Geometry::Point { .. } => "point",
            Geometry::Rect { .. } => "rect",
            Geometry::Polygon { .. } => "polygon",
        }
    }

    /// Reference point: the point itself, rect center, polygon vertex mean.
    pub fn anchor(&self) -> (f32, f32) {
        match self {
            Geometry::Point { x, y } => (*x, *y),
            Geometry::Rect { x, y, width, height } => (x + width * 0.5, y + height * 0.5),
            Geometry::Polygon { points } => {
                if points.is_empty() {
                    return (0.0, 0.0);
                }
                let n = points.len() as f32;
                let (sx, sy) = points
                    .iter()
                    .fold((0.0, 0.0), |(ax, ay), p| (ax + p[0], ay + p[1]));
                (sx / n, sy / n)
            }
        }
    }

    /// Translate so that the anchor lands on (x, y). Shape is preserved.
    pub fn move_to(&mut self, x: f32, y: f32) {
        let (ax, ay) = self.anchor();
        let (dx, dy) = (x - ax, y - ay);
        match self {
            Geometry::Point { x: px, y: py } => {
                *px = x;
                *py = y;
            }
            Geometry::Rect { x: rx, y: ry, .. } => {
                *rx += dx;
                *ry += dy;
            }
            Geometry::Polygon { points } => {
                for p in points.iter_mut() {
                    p[0] += dx;
                    p[1] += dy;
                }
            }
        }
    }

    pub fn distance_to(&self, x: f32, y: f32) -> f32 {
        let (ax, ay) = self.anchor();
        ((ax - x).powi(2) + (ay - y).powi(2)).sqrt()
    }

    /// Axis-aligned bounds as (x, y, width, height)
    pub fn bounds(&self) -> (f32, f32, f32, f32) {
        match self {
            Geometry::Point { x, y } => (*x, *y, 0.0, 0.0),
            Geometry::Rect { x, y, width, height } => (*x, *y, *width, *height),
            Geometry::Polygon { points } => {
                if points.is_empty() {
                    return (0.0, 0.0, 0.0, 0.0);
                }
                let (mut x0, mut y0) = (f32::MAX, f32::MAX);
                let (mut x1, mut y1) = (f32::MIN, f32::MIN);
                for p in points {
                    x0 = x0.min(p[0]);
                    y0 = y0.min(p[1]);
                    x1 = x1.max(p[0]);
                    y1 = y1.max(p[1]);
                }
                (x0, y0, x1 - x0, y1 - y0)
            }
        }
    }
}

/// One geometry snapshot plus attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedComponent {
    pub geometry: Geometry,
    #[serde(default, skip_serializing_if = "Attrs::is_empty")]
    pub attributes: Attrs,
}

impl TrackedComponent {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            geometry,
            attributes: Attrs::new(),
        }
    }

    pub fn point(x: f32, y: f32) -> Self {
        Self::new(Geometry::Point { x, y })
    }

    pub fn with_attr(mut self, key: &str, value: AttrValue) -> Self {
        self.attributes.set(key, value);
        self
    }
}

/// One entity and its frame-ordered history.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedObject {
    pub id: ObjectId,
    pub frames: BTreeMap<u64, Vec<TrackedComponent>>,
}

impl TrackedObject {
    pub fn new(id: ObjectId) -> Self {
        Self {
            id,
            frames: BTreeMap::new(),
        }
    }

    pub fn components(&self, frame: u64) -> &[TrackedComponent] {
        self.frames.get(&frame).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn first_frame(&self) -> Option<u64> {
        self.frames.keys().next().copied()
    }

    pub fn last_frame(&self) -> Option<u64> {
        self.frames.keys().next_back().copied()
    }

    /// Most recent component at or before `frame`
    pub fn latest_at_or_before(&self, frame: u64) -> Option<(u64, &TrackedComponent)> {
        self.frames
            .range(..=frame)
            .rev()
            .find_map(|(f, comps)| comps.last().map(|c| (*f, c)))
    }

    /// Most recent component overall
    pub fn last_component(&self) -> Option<(u64, &TrackedComponent)> {
        self.frames
            .iter()
            .rev()
            .find_map(|(f, comps)| comps.last().map(|c| (*f, c)))
    }

    pub fn component_count(&self) -> usize {
        self.frames.values().map(Vec::len).sum()
    }
}

/// User edit, queued and applied between algorithm calls.
#[derive(Debug, Clone, PartialEq)]
pub enum EditCommand {
    /// New object with a single point component at `frame`
    AddTrajectory { frame: u64, x: f32, y: f32 },
    /// Move the latest component of `id`
    MoveLastComponent { id: ObjectId, x: f32, y: f32 },
    RemoveTrajectory { id: ObjectId },
}

/// All tracked objects of a session.
#[derive(Debug, Clone, Default)]
pub struct TrajectoryStore {
    objects: IndexMap<ObjectId, TrackedObject>,
    next_id: u64,
    frontier: Option<u64>,
}

// Content equality: the frontier and id counter are bookkeeping.
impl PartialEq for TrajectoryStore {
    fn eq(&self, other: &Self) -> bool {
        self.objects == other.objects
    }
}

impl TrajectoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from already-validated objects (archive load). Ids must be unique.
    pub(crate) fn from_objects(objects: Vec<TrackedObject>) -> Self {
        let next_id = objects.iter().map(|o| o.id.0 + 1).max().unwrap_or(0);
        let frontier = objects.iter().filter_map(TrackedObject::last_frame).max();
        Self {
            objects: objects.into_iter().map(|o| (o.id, o)).collect(),
            next_id,
            frontier,
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn object(&self, id: ObjectId) -> Option<&TrackedObject> {
        self.objects.get(&id)
    }

    pub fn objects(&self) -> impl Iterator<Item = &TrackedObject> {
        self.objects.values()
    }

    pub fn ids(&self) -> Vec<ObjectId> {
        self.objects.keys().copied().collect()
    }

    /// (object, components) for every object with entries at `frame`
    pub fn components_at(&self, frame: u64) -> impl Iterator<Item = (ObjectId, &[TrackedComponent])> {
        self.objects.values().filter_map(move |o| {
            o.frames
                .get(&frame)
                .filter(|c| !c.is_empty())
                .map(|c| (o.id, c.as_slice()))
        })
    }

    /// Highest frame with any component
    pub fn max_frame(&self) -> Option<u64> {
        self.objects.values().filter_map(TrackedObject::last_frame).max()
    }

    pub fn clear(&mut self) {
        self.objects.clear();
        self.next_id = 0;
        self.frontier = None;
    }

    // === Frontier ===

    pub fn frontier(&self) -> Option<u64> {
        self.frontier
    }

    /// True if `track()` has not yet run for `frame`
    pub fn needs_tracking(&self, frame: u64) -> bool {
        self.frontier.is_none_or(|f| frame > f)
    }

    pub fn advance_frontier(&mut self, frame: u64) {
        if self.needs_tracking(frame) {
            self.frontier = Some(frame);
        }
    }

    pub fn reset_frontier(&mut self) {
        self.frontier = None;
    }

    /// Write access for the algorithm, limited to `frame`.
    pub fn scope(&mut self, frame: u64) -> FrameScope<'_> {
        FrameScope { store: self, frame }
    }

    fn allocate_id(&mut self) -> ObjectId {
        let id = ObjectId(self.next_id);
        self.next_id += 1;
        id
    }

    // === User edits ===

    pub fn add_trajectory(&mut self, frame: u64, x: f32, y: f32) -> ObjectId {
        let id = self.allocate_id();
        let mut object = TrackedObject::new(id);
        object.frames.insert(
            frame,
            vec![TrackedComponent::point(x, y).with_attr(A_USER_EDIT, AttrValue::Bool(true))],
        );
        self.objects.insert(id, object);
        debug!("Added trajectory {} at frame {}", id, frame);
        id
    }

    pub fn move_last_component(&mut self, id: ObjectId, x: f32, y: f32) -> bool {
        let Some(object) = self.objects.get_mut(&id) else {
            return false;
        };
        let Some(component) = object.frames.values_mut().rev().find_map(|c| c.last_mut()) else {
            return false;
        };
        component.geometry.move_to(x, y);
        component.attributes.set(A_USER_EDIT, AttrValue::Bool(true));
        true
    }

    pub fn remove_trajectory(&mut self, id: ObjectId) -> bool {
        self.objects.shift_remove(&id).is_some()
    }

    /// Apply one queued edit. Unknown ids are logged and dropped.
    pub fn apply_edit(&mut self, edit: &EditCommand) -> bool {
        let applied = match *edit {
            EditCommand::AddTrajectory { frame, x, y } => {
                self.add_trajectory(frame, x, y);
                true
            }
            EditCommand::MoveLastComponent { id, x, y } => self.move_last_component(id, x, y),
            EditCommand::RemoveTrajectory { id } => self.remove_trajectory(id),
        };
        if !applied {
            warn!("Dropped edit {:?}: unknown object", edit);
        }
        applied
    }
}

/// Store view handed to `track()` for a single frame.
pub struct FrameScope<'a> {
    store: &'a mut TrajectoryStore,
    frame: u64,
}

impl FrameScope<'_> {
    pub fn frame_number(&self) -> u64 {
        self.frame
    }

    /// Read-only view of the whole history
    pub fn store(&self) -> &TrajectoryStore {
        self.store
    }

    pub fn object(&self, id: ObjectId) -> Option<&TrackedObject> {
        self.store.object(id)
    }

    pub fn objects(&self) -> impl Iterator<Item = &TrackedObject> {
        self.store.objects()
    }

    /// Latest component of `id` strictly before this frame
    pub fn previous_component(&self, id: ObjectId) -> Option<(u64, &TrackedComponent)> {
        let frame = self.frame.checked_sub(1)?;
        self.store.object(id)?.latest_at_or_before(frame)
    }

    /// Components already written for this frame
    pub fn current_components(&self, id: ObjectId) -> &[TrackedComponent] {
        self.store
            .object(id)
            .map(|o| o.components(self.frame))
            .unwrap_or(&[])
    }

    /// New object with a first component at this frame
    pub fn create_object(&mut self, component: TrackedComponent) -> ObjectId {
        let id = self.store.allocate_id();
        let mut object = TrackedObject::new(id);
        object.frames.insert(self.frame, vec![component]);
        self.store.objects.insert(id, object);
        id
    }

    /// Append a component for this frame. False if `id` is unknown.
    pub fn push_component(&mut self, id: ObjectId, component: TrackedComponent) -> bool {
        match self.store.objects.get_mut(&id) {
            Some(object) => {
                object.frames.entry(self.frame).or_default().push(component);
                true
            }
            None => false,
        }
    }

    /// Replace this frame's components of `id`
    pub fn set_components(&mut self, id: ObjectId, components: Vec<TrackedComponent>) -> bool {
        match self.store.objects.get_mut(&id) {
            Some(object) => {
                if components.is_empty() {
                    object.frames.remove(&self.frame);
                } else {
                    object.frames.insert(self.frame, components);
                }
                true
            }
            None => false,
        }
    }

    pub fn clear_components(&mut self, id: ObjectId) -> bool {
        self.set_components(id, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::keys::A_CARRIED;

    #[test]
    fn test_geometry_anchor_and_move() {
        let mut rect = Geometry::Rect { x: 0.0, y: 0.0, width: 10.0, height: 4.0 };
        assert_eq!(rect.anchor(), (5.0, 2.0));
        rect.move_to(20.0, 20.0);
        assert_eq!(rect, Geometry::Rect { x: 15.0, y: 18.0, width: 10.0, height: 4.0 });

        let mut poly = Geometry::Polygon { points: vec![[0.0, 0.0], [2.0, 0.0], [2.0, 2.0], [0.0, 2.0]] };
        assert_eq!(poly.anchor(), (1.0, 1.0));
        poly.move_to(3.0, 1.0);
        assert_eq!(poly.bounds(), (2.0, 0.0, 2.0, 2.0));
        assert_eq!(Geometry::Point { x: 3.0, y: 4.0 }.distance_to(0.0, 0.0), 5.0);
    }

    #[test]
    fn test_scope_writes_only_current_frame() {
        let mut store = TrajectoryStore::new();
        let id = store.scope(0).create_object(TrackedComponent::point(1.0, 1.0));
        {
            let mut scope = store.scope(1);
            let (from, prev) = scope.previous_component(id).unwrap();
            assert_eq!(from, 0);
            let carried = prev.clone().with_attr(A_CARRIED, AttrValue::Bool(true));
            assert!(scope.push_component(id, carried));
            assert!(!scope.push_component(ObjectId(99), TrackedComponent::point(0.0, 0.0)));
        }
        let object = store.object(id).unwrap();
        assert_eq!(object.frames.keys().copied().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(object.components(0).len(), 1);
        assert_eq!(object.components(1)[0].attributes.get_bool(A_CARRIED), Some(true));
    }

    #[test]
    fn test_frontier() {
        let mut store = TrajectoryStore::new();
        assert!(store.needs_tracking(0));
        store.advance_frontier(4);
        assert!(!store.needs_tracking(4));
        assert!(!store.needs_tracking(2));
        assert!(store.needs_tracking(5));
        store.advance_frontier(1);
        assert_eq!(store.frontier(), Some(4));
        store.reset_frontier();
        assert!(store.needs_tracking(0));
    }

    #[test]
    fn test_edits() {
        let mut store = TrajectoryStore::new();
        let a = store.add_trajectory(3, 10.0, 10.0);
        let b = store.add_trajectory(3, 50.0, 50.0);
        assert_ne!(a, b);

        assert!(store.apply_edit(&EditCommand::MoveLastComponent { id: a, x: 12.0, y: 11.0 }));
        let (frame, comp) = store.object(a).unwrap().last_component().unwrap();
        assert_eq!(frame, 3);
        assert_eq!(comp.geometry, Geometry::Point { x: 12.0, y: 11.0 });

        assert!(store.apply_edit(&EditCommand::RemoveTrajectory { id: b }));
        assert!(!store.apply_edit(&EditCommand::RemoveTrajectory { id: b }));
        assert_eq!(store.ids(), vec![a]);

        // Ids are never reused after removal
        let c = store.add_trajectory(4, 0.0, 0.0);
        assert_eq!(c, ObjectId(2));
    }

    #[test]
    fn test_components_at() {
        let mut store = TrajectoryStore::new();
        let a = store.scope(0).create_object(TrackedComponent::point(0.0, 0.0));
        store.scope(1).create_object(TrackedComponent::point(5.0, 5.0));
        store.scope(1).push_component(a, TrackedComponent::point(1.0, 0.0));

        let at1: Vec<ObjectId> = store.components_at(1).map(|(id, _)| id).collect();
        assert_eq!(at1.len(), 2);
        assert_eq!(store.components_at(0).count(), 1);
        assert_eq!(store.max_frame(), Some(1));
    }
}
