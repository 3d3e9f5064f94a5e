//! Named, typed attributes attached to tracked components and plugin params.
//!
//! Keys keep insertion order (`IndexMap`) so archives re-serialize in the
//! same order they were read.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Generic attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Vec2([f32; 2]),
}

/// Attribute container: string key -> typed value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attrs {
    map: IndexMap<String, AttrValue>,
}

impl Attrs {
    pub fn new() -> Self {
        Self {
            map: IndexMap::new(),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: AttrValue) {
        self.map.insert(key.into(), value);
    }

    /// Builder-style `set`
    pub fn with(mut self, key: impl Into<String>, value: AttrValue) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.map.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.map.get(key) {
            Some(AttrValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.map.get(key) {
            Some(AttrValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// Float lookup; integer values are widened.
    pub fn get_float(&self, key: &str) -> Option<f64> {
        match self.map.get(key) {
            Some(AttrValue::Float(v)) => Some(*v),
            Some(AttrValue::Int(v)) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.map.get(key) {
            Some(AttrValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_vec2(&self, key: &str) -> Option<[f32; 2]> {
        match self.map.get(key) {
            Some(AttrValue::Vec2(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_int_or(&self, key: &str, default: i64) -> i64 {
        self.get_int(key).unwrap_or(default)
    }

    pub fn get_float_or(&self, key: &str, default: f64) -> f64 {
        self.get_float(key).unwrap_or(default)
    }

    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).unwrap_or(default)
    }

    /// Remove attribute by key, keeping the order of the rest
    pub fn remove(&mut self, key: &str) -> Option<AttrValue> {
        self.map.shift_remove(key)
    }

    /// Overlay `other` on top of self (other wins on conflicts)
    pub fn merge(&mut self, other: &Attrs) {
        for (k, v) in other.iter() {
            self.map.insert(k.clone(), v.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttrValue)> {
        self.map.iter()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_getters() {
        let attrs = Attrs::new()
            .with("lost", AttrValue::Bool(true))
            .with("score", AttrValue::Float(0.5))
            .with("track_id", AttrValue::Int(4))
            .with("label", AttrValue::Str("fish".into()))
            .with("velocity", AttrValue::Vec2([1.0, -2.0]));

        assert_eq!(attrs.get_bool("lost"), Some(true));
        assert_eq!(attrs.get_float("score"), Some(0.5));
        assert_eq!(attrs.get_float("track_id"), Some(4.0));
        assert_eq!(attrs.get_int("score"), None);
        assert_eq!(attrs.get_str("label"), Some("fish"));
        assert_eq!(attrs.get_vec2("velocity"), Some([1.0, -2.0]));
        assert_eq!(attrs.get_int_or("missing", 9), 9);
    }

    #[test]
    fn test_order_preserved_through_json() {
        let attrs = Attrs::new()
            .with("z", AttrValue::Int(1))
            .with("a", AttrValue::Int(2))
            .with("m", AttrValue::Int(3));
        let json = serde_json::to_string(&attrs).unwrap();
        let back: Attrs = serde_json::from_str(&json).unwrap();
        let keys: Vec<&str> = back.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
        assert_eq!(back, attrs);
    }

    #[test]
    fn test_merge_and_remove() {
        let mut base = Attrs::new()
            .with("radius", AttrValue::Int(6))
            .with("carry_forward", AttrValue::Bool(true));
        base.merge(&Attrs::new().with("radius", AttrValue::Int(10)));
        assert_eq!(base.get_int("radius"), Some(10));
        assert_eq!(base.remove("carry_forward"), Some(AttrValue::Bool(true)));
        assert_eq!(base.len(), 1);
    }
}
