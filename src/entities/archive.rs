//! Trajectory archive (JSON) and CSV export.
//!
//! Archive layout:
//! ```json
//! { "version": 1, "algorithm": "manual",
//!   "objects": [ { "id": 0, "frames": [
//!       { "frameNumber": 0, "components": [ { "geometry": {...}, "attributes": {...} } ] } ] } ] }
//! ```
//! Loading validates the whole document before building a store, so a bad
//! file never leaves a half-loaded store behind.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::{self, Write};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::trajectory::{ObjectId, TrackedComponent, TrackedObject, TrajectoryStore};

pub const ARCHIVE_VERSION: u32 = 1;

/// Archive save/load failures
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed archive: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported archive version {0}")]
    UnsupportedVersion(u32),
    #[error("duplicate object id {0}")]
    DuplicateId(ObjectId),
    #[error("object {id} lists frame {frame} twice")]
    DuplicateFrame { id: ObjectId, frame: u64 },
    #[error("no serialization target set")]
    NoTarget,
}

#[derive(Debug, Serialize, Deserialize)]
struct ArchiveDoc {
    version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    algorithm: Option<String>,
    objects: Vec<ObjectDoc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ObjectDoc {
    id: ObjectId,
    frames: Vec<FrameDoc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FrameDoc {
    frame_number: u64,
    components: Vec<TrackedComponent>,
}

/// Result of reading an archive
#[derive(Debug)]
pub struct LoadedArchive {
    pub store: TrajectoryStore,
    /// Algorithm that produced the archive, if recorded
    pub algorithm: Option<String>,
}

impl TrajectoryStore {
    pub fn to_json_string(&self, algorithm: Option<&str>) -> Result<String, SerializationError> {
        let doc = ArchiveDoc {
            version: ARCHIVE_VERSION,
            algorithm: algorithm.map(str::to_string),
            objects: self
                .objects()
                .map(|o| ObjectDoc {
                    id: o.id,
                    frames: o
                        .frames
                        .iter()
                        .map(|(f, comps)| FrameDoc {
                            frame_number: *f,
                            components: comps.clone(),
                        })
                        .collect(),
                })
                .collect(),
        };
        Ok(serde_json::to_string_pretty(&doc)?)
    }

    pub fn from_json_str(json: &str) -> Result<LoadedArchive, SerializationError> {
        let doc: ArchiveDoc = serde_json::from_str(json)?;
        if doc.version != ARCHIVE_VERSION {
            return Err(SerializationError::UnsupportedVersion(doc.version));
        }

        let mut seen = HashSet::new();
        let mut objects = Vec::with_capacity(doc.objects.len());
        for obj in doc.objects {
            if !seen.insert(obj.id) {
                return Err(SerializationError::DuplicateId(obj.id));
            }
            let mut frames = BTreeMap::new();
            for frame in obj.frames {
                if frames.insert(frame.frame_number, frame.components).is_some() {
                    return Err(SerializationError::DuplicateFrame {
                        id: obj.id,
                        frame: frame.frame_number,
                    });
                }
            }
            objects.push(TrackedObject { id: obj.id, frames });
        }

        Ok(LoadedArchive {
            store: TrajectoryStore::from_objects(objects),
            algorithm: doc.algorithm,
        })
    }

    /// Write the archive to `path`.
    pub fn save(&self, path: &Path, algorithm: Option<&str>) -> Result<(), SerializationError> {
        let json = self.to_json_string(algorithm)?;
        fs::write(path, json).map_err(|source| SerializationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Saved {} trajectories to {}", self.len(), path.display());
        Ok(())
    }

    /// Read an archive from `path`. The caller swaps the store in on success.
    pub fn load(path: &Path) -> Result<LoadedArchive, SerializationError> {
        let json = fs::read_to_string(path).map_err(|source| SerializationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let loaded = Self::from_json_str(&json)?;
        info!("Loaded {} trajectories from {}", loaded.store.len(), path.display());
        Ok(loaded)
    }
}

/// Write one CSV row per component, optionally limited to a frame range.
/// Returns the number of data rows.
pub fn export_csv<W: Write>(
    store: &TrajectoryStore,
    range: Option<RangeInclusive<u64>>,
    mut out: W,
) -> io::Result<usize> {
    writeln!(out, "frame,object,component,kind,x,y,width,height")?;

    // Frame-major order
    let mut rows: Vec<(u64, ObjectId, usize, &TrackedComponent)> = Vec::new();
    for object in store.objects() {
        for (frame, comps) in &object.frames {
            if range.as_ref().is_some_and(|r| !r.contains(frame)) {
                continue;
            }
            for (i, comp) in comps.iter().enumerate() {
                rows.push((*frame, object.id, i, comp));
            }
        }
    }
    rows.sort_by_key(|(frame, id, i, _)| (*frame, *id, *i));

    for (frame, id, i, comp) in &rows {
        let (x, y, w, h) = comp.geometry.bounds();
        writeln!(
            out,
            "{},{},{},{},{},{},{},{}",
            frame,
            id.0,
            i,
            comp.geometry.kind(),
            x,
            y,
            w,
            h
        )?;
    }
    out.flush()?;
    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::attrs::AttrValue;
    use crate::entities::keys::A_SCORE;
    use crate::entities::trajectory::Geometry;

    fn sample_store() -> (TrajectoryStore, ObjectId, ObjectId) {
        let mut store = TrajectoryStore::new();
        let a = store.scope(0).create_object(TrackedComponent::point(1.0, 2.0));
        store.scope(1).push_component(
            a,
            TrackedComponent::new(Geometry::Rect { x: 1.0, y: 2.0, width: 4.0, height: 3.0 })
                .with_attr(A_SCORE, AttrValue::Float(0.75)),
        );
        store.scope(2).push_component(
            a,
            TrackedComponent::new(Geometry::Polygon { points: vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]] }),
        );
        let b = store.scope(2).create_object(TrackedComponent::point(9.0, 9.0));
        (store, a, b)
    }

    #[test]
    fn test_round_trip() {
        let (store, a, b) = sample_store();
        let json = store.to_json_string(Some("manual")).unwrap();
        assert!(json.contains("\"frameNumber\""));

        let loaded = TrajectoryStore::from_json_str(&json).unwrap();
        assert_eq!(loaded.algorithm.as_deref(), Some("manual"));
        assert_eq!(loaded.store, store);
        assert_eq!(loaded.store.object(a).unwrap().frames.len(), 3);
        assert_eq!(loaded.store.object(b).unwrap().frames.len(), 1);
        assert_eq!(loaded.store.frontier(), Some(2));

        // Unmodified store re-serializes to the same document
        assert_eq!(loaded.store.to_json_string(Some("manual")).unwrap(), json);
    }

    #[test]
    fn test_new_ids_continue_after_load() {
        let (store, _, b) = sample_store();
        let json = store.to_json_string(None).unwrap();
        let mut loaded = TrajectoryStore::from_json_str(&json).unwrap().store;
        let c = loaded.add_trajectory(3, 0.0, 0.0);
        assert!(c.0 > b.0);
    }

    #[test]
    fn test_rejects_bad_documents() {
        assert!(matches!(
            TrajectoryStore::from_json_str(r#"{"version": 2, "objects": []}"#),
            Err(SerializationError::UnsupportedVersion(2))
        ));
        assert!(matches!(
            TrajectoryStore::from_json_str(
                r#"{"version": 1, "objects": [{"id": 3, "frames": []}, {"id": 3, "frames": []}]}"#
            ),
            Err(SerializationError::DuplicateId(ObjectId(3)))
        ));
        assert!(matches!(
            TrajectoryStore::from_json_str("{\"version\": 1, \"objects\": [ {"),
            Err(SerializationError::Json(_))
        ));
    }

    #[test]
    fn test_save_load_file() {
        let (store, _, _) = sample_store();
        let path = std::env::temp_dir().join("trackplay_test_archive.json");
        store.save(&path, Some("manual")).unwrap();
        let loaded = TrajectoryStore::load(&path).unwrap();
        assert_eq!(loaded.store, store);
        let _ = fs::remove_file(&path);

        assert!(matches!(
            TrajectoryStore::load(Path::new("/nonexistent/trackplay.json")),
            Err(SerializationError::Io { .. })
        ));
    }

    #[test]
    fn test_export_csv_range() {
        let (store, _, _) = sample_store();
        let mut buf = Vec::new();
        let rows = export_csv(&store, Some(1..=2), &mut buf).unwrap();
        assert_eq!(rows, 3);

        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "frame,object,component,kind,x,y,width,height");
        assert_eq!(lines[1], "1,0,0,rect,1,2,4,3");
        assert!(lines[2].starts_with("2,0,0,polygon,"));
        assert_eq!(lines[3], "2,1,0,point,9,9,0,0");

        let mut all = Vec::new();
        assert_eq!(export_csv(&store, None, &mut all).unwrap(), 4);
    }
}
