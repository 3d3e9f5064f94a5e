//! Attribute key constants for component attributes and plugin params.
//!
//! Avoid string typos, enable IDE autocomplete.
//! Usage: `component.attributes.get_bool(A_CARRIED)`

// === Component attributes ===
/// Component was copied forward from an earlier frame, not observed
pub const A_CARRIED: &str = "carried";
/// Component was placed or moved by a user edit
pub const A_USER_EDIT: &str = "user_edit";
/// Object was marked lost by the user; trackers stop extending it
pub const A_LOST: &str = "lost";
/// Detection confidence (0.0-1.0)
pub const A_SCORE: &str = "score";
/// Free-form label
pub const A_LABEL: &str = "label";

// === Plugin params ===
/// Copy last known geometry into frames without an observation
pub const P_CARRY_FORWARD: &str = "carry_forward";
/// Marker radius in pixels for overlays
pub const P_MARKER_RADIUS: &str = "marker_radius";
/// Pointer pick distance in pixels
pub const P_PICK_RADIUS: &str = "pick_radius";
