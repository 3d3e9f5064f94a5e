//! Manual tracker: the user places objects, the tracker carries them forward.
//!
//! Each tracked frame copies every object's latest component into the new
//! frame (marked `carried`) until the user marks the object lost. Pointer
//! presses select the nearest object or start a new trajectory; dragging
//! moves the selected object's latest component.
//!
//! Params: `carry_forward` (bool, default true), `marker_radius` (int,
//! default 6), `pick_radius` (float, default 12).

use std::collections::BTreeSet;

use image::{Rgba, RgbaImage};
use log::debug;

use super::{
    AlgorithmError, AlgorithmPlugin, ControlKind, InputContext, Key, KeyEvent, KeySet, Notifier,
    PanelDescriptor, PointerButton, PointerEvent, PointerKind,
};
use crate::entities::keys::{A_CARRIED, A_LOST, A_USER_EDIT, P_CARRY_FORWARD, P_MARKER_RADIUS, P_PICK_RADIUS};
use crate::entities::{AttrValue, Attrs, EditCommand, Frame, FrameScope, Geometry, ObjectId, TrackedComponent, TrajectoryStore};

pub const MANUAL_TRACKER: &str = "manual";

const COLOR_TRACKED: Rgba<u8> = Rgba([64, 220, 96, 255]);
const COLOR_SELECTED: Rgba<u8> = Rgba([255, 210, 40, 255]);
const COLOR_LOST: Rgba<u8> = Rgba([230, 60, 60, 255]);

pub struct ManualTracker {
    name: String,
    carry_forward: bool,
    marker_radius: i64,
    pick_radius: f32,
    selected: Option<ObjectId>,
    dragging: bool,
    /// Marked lost by the user; flagged in the store on the next tracked frame
    lost: BTreeSet<ObjectId>,
    notifier: Option<Notifier>,
}

impl ManualTracker {
    pub fn new(name: &str, params: &Attrs) -> Self {
        Self {
            name: name.to_string(),
            carry_forward: params.get_bool_or(P_CARRY_FORWARD, true),
            marker_radius: params.get_int_or(P_MARKER_RADIUS, 6).clamp(1, 64),
            pick_radius: params.get_float_or(P_PICK_RADIUS, 12.0) as f32,
            selected: None,
            dragging: false,
            lost: BTreeSet::new(),
            notifier: None,
        }
    }

    pub fn selected(&self) -> Option<ObjectId> {
        self.selected
    }

    /// Nearest object to (x, y) as seen at `frame`, within pick radius
    fn pick(&self, ctx: &InputContext<'_>, x: f32, y: f32) -> Option<ObjectId> {
        let frame = ctx.frame?;
        ctx.store
            .objects()
            .filter_map(|o| {
                let (_, comp) = o.latest_at_or_before(frame)?;
                let d = comp.geometry.distance_to(x, y);
                (d <= self.pick_radius).then_some((o.id, d))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id)
    }

    fn draw_component(&self, canvas: &mut RgbaImage, comp: &TrackedComponent, color: Rgba<u8>) {
        let r = self.marker_radius as f32;
        match &comp.geometry {
            Geometry::Point { x, y } => {
                draw_line(canvas, (x - r, *y), (x + r, *y), color);
                draw_line(canvas, (*x, y - r), (*x, y + r), color);
            }
            Geometry::Rect { x, y, width, height } => {
                let (x1, y1) = (x + width, y + height);
                draw_line(canvas, (*x, *y), (x1, *y), color);
                draw_line(canvas, (x1, *y), (x1, y1), color);
                draw_line(canvas, (x1, y1), (*x, y1), color);
                draw_line(canvas, (*x, y1), (*x, *y), color);
            }
            Geometry::Polygon { points } => {
                for (i, p) in points.iter().enumerate() {
                    let q = points[(i + 1) % points.len()];
                    draw_line(canvas, (p[0], p[1]), (q[0], q[1]), color);
                }
            }
        }
    }
}

impl AlgorithmPlugin for ManualTracker {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_activate(&mut self, notifier: Notifier) {
        notifier.info("click to place objects, drag to correct, L marks lost, Delete removes");
        self.notifier = Some(notifier);
    }

    fn track(&mut self, frame_number: u64, _frame: &Frame, scope: &mut FrameScope<'_>) -> Result<(), AlgorithmError> {
        if !self.carry_forward {
            return Ok(());
        }

        let mut carried = Vec::new();
        for object in scope.objects() {
            if !object.components(frame_number).is_empty() {
                continue;
            }
            let Some((_, prev)) = scope.previous_component(object.id) else {
                continue;
            };
            if prev.attributes.get_bool_or(A_LOST, false) {
                continue;
            }
            let mut next = prev.clone();
            next.attributes.remove(A_USER_EDIT);
            next.attributes.set(A_CARRIED, AttrValue::Bool(true));
            if self.lost.contains(&object.id) {
                next.attributes.set(A_LOST, AttrValue::Bool(true));
            }
            carried.push((object.id, next));
        }

        for (id, comp) in carried {
            scope.push_component(id, comp);
        }
        Ok(())
    }

    fn paint(&mut self, frame: &Frame, store: &TrajectoryStore) -> Result<RgbaImage, AlgorithmError> {
        let mut canvas = frame.to_canvas();
        for (id, comps) in store.components_at(frame.index()) {
            for comp in comps {
                let color = if comp.attributes.get_bool_or(A_LOST, false) || self.lost.contains(&id) {
                    COLOR_LOST
                } else if self.selected == Some(id) {
                    COLOR_SELECTED
                } else {
                    COLOR_TRACKED
                };
                self.draw_component(&mut canvas, comp, color);
            }
        }
        Ok(canvas)
    }

    fn reset(&mut self) {
        self.selected = None;
        self.dragging = false;
        self.lost.clear();
    }

    fn grabbed_keys(&self) -> KeySet {
        [Key::Delete, Key::Escape, Key::Char('l')].into_iter().collect()
    }

    fn prepare_save(&mut self, store: &TrajectoryStore) {
        debug!("{}: saving {} objects ({} marked lost)", self.name, store.len(), self.lost.len());
    }

    fn post_load(&mut self, store: &TrajectoryStore) {
        self.selected = None;
        self.dragging = false;
        self.lost = store
            .objects()
            .filter(|o| {
                o.last_component()
                    .is_some_and(|(_, c)| c.attributes.get_bool_or(A_LOST, false))
            })
            .map(|o| o.id)
            .collect();
    }

    fn tools_panel(&self) -> Option<PanelDescriptor> {
        let selection = match self.selected {
            Some(id) => format!("selected {}", id),
            None => "nothing selected".to_string(),
        };
        Some(
            PanelDescriptor::new("Manual tracking")
                .control("selection", &selection, ControlKind::Label)
                .control("mark_lost", "Mark lost (L)", ControlKind::Button)
                .control("remove", "Remove (Del)", ControlKind::Button),
        )
    }

    fn params_panel(&self) -> Option<PanelDescriptor> {
        Some(
            PanelDescriptor::new("Parameters")
                .control(P_CARRY_FORWARD, "Carry forward", ControlKind::Toggle { value: self.carry_forward })
                .control(
                    P_MARKER_RADIUS,
                    "Marker radius",
                    ControlKind::Slider { min: 1.0, max: 64.0, value: self.marker_radius as f64 },
                )
                .control(
                    P_PICK_RADIUS,
                    "Pick radius",
                    ControlKind::Slider { min: 1.0, max: 128.0, value: self.pick_radius as f64 },
                ),
        )
    }

    fn on_key(&mut self, event: &KeyEvent, _ctx: &InputContext<'_>) -> Vec<EditCommand> {
        if !event.pressed {
            return Vec::new();
        }
        match event.key {
            Key::Escape => {
                self.selected = None;
                Vec::new()
            }
            Key::Delete => match self.selected.take() {
                Some(id) => {
                    self.lost.remove(&id);
                    vec![EditCommand::RemoveTrajectory { id }]
                }
                None => Vec::new(),
            },
            Key::Char('l') => {
                if let Some(id) = self.selected {
                    self.lost.insert(id);
                    if let Some(n) = &self.notifier {
                        n.info(format!("object {} marked lost", id));
                    }
                }
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn on_pointer(&mut self, event: &PointerEvent, ctx: &InputContext<'_>) -> Vec<EditCommand> {
        match event.kind {
            PointerKind::Press(PointerButton::Primary) => {
                if let Some(id) = self.pick(ctx, event.x, event.y) {
                    self.selected = Some(id);
                    self.dragging = true;
                    return Vec::new();
                }
                self.selected = None;
                match ctx.frame {
                    Some(frame) => vec![EditCommand::AddTrajectory { frame, x: event.x, y: event.y }],
                    None => Vec::new(),
                }
            }
            PointerKind::Press(PointerButton::Secondary) => {
                self.selected = None;
                Vec::new()
            }
            PointerKind::Move if self.dragging => match self.selected {
                Some(id) => vec![EditCommand::MoveLastComponent { id, x: event.x, y: event.y }],
                None => Vec::new(),
            },
            PointerKind::Release(PointerButton::Primary) => {
                self.dragging = false;
                Vec::new()
            }
            _ => Vec::new(),
        }
    }
}

/// Clipped line, DDA steps of one pixel
fn draw_line(canvas: &mut RgbaImage, from: (f32, f32), to: (f32, f32), color: Rgba<u8>) {
    let (w, h) = (canvas.width() as i64, canvas.height() as i64);
    let (dx, dy) = (to.0 - from.0, to.1 - from.1);
    let steps = dx.abs().max(dy.abs()).ceil().max(1.0) as i64;
    for i in 0..=steps {
        let t = i as f32 / steps as f32;
        let x = (from.0 + dx * t).round() as i64;
        let y = (from.1 + dy * t).round() as i64;
        if x >= 0 && y >= 0 && x < w && y < h {
            canvas.put_pixel(x as u32, y as u32, color);
        }
    }
}
