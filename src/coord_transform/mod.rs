//! CoordTransform - Pixel to Map Coordinate Conversion
//!
//! ## Responsibilities
//!
//! - Hold per-camera calibration (3x3 homography + scale)
//! - Convert bbox centroids to world (mm), normalized and map coordinates
//! - Resolve the owning zone from normalized coordinates
//!
//! Without calibration (or with a degenerate matrix) the transform falls
//! back to plain frame-relative normalization.

use crate::models::{Area, Detection, LocatedDetection};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Frame dimensions assumed when the owning frame is unavailable
pub const DEFAULT_FRAME_WIDTH: f64 = 640.0;
pub const DEFAULT_FRAME_HEIGHT: f64 = 480.0;

/// Per-camera calibration as delivered by the map_calibration event
#[derive(Debug, Clone)]
pub struct CalibrationRecord {
    pub matrix: [[f64; 3]; 3],
    pub scale: f64,
    pub received_at: DateTime<Utc>,
}

/// Calibration store; written by the dispatcher, read by the pipeline
#[derive(Default)]
pub struct CalibrationStore {
    records: RwLock<HashMap<String, CalibrationRecord>>,
}

impl CalibrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, camera_id: &str, matrix: [[f64; 3]; 3], scale: f64) {
        let mut records = self.records.write().await;
        records.insert(
            camera_id.to_string(),
            CalibrationRecord {
                matrix,
                scale,
                received_at: Utc::now(),
            },
        );
        tracing::info!(camera_id = %camera_id, scale = scale, "Calibration stored");
    }

    pub async fn get(&self, camera_id: &str) -> Option<CalibrationRecord> {
        self.records.read().await.get(camera_id).cloned()
    }

    pub async fn calibrated_count(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn clear(&self) {
        self.records.write().await.clear();
    }
}

/// Static zone table, loaded once at startup
pub struct AreaTable {
    areas: Vec<Area>,
    names: HashMap<u8, String>,
}

impl AreaTable {
    pub fn new(mut areas: Vec<Area>) -> Self {
        areas.sort_by_key(|a| a.area_id);
        let names = areas
            .iter()
            .map(|a| (a.area_id, a.area_name.clone()))
            .collect();
        Self { areas, names }
    }

    pub fn areas(&self) -> &[Area] {
        &self.areas
    }

    /// First area containing the point, in stable id order. Overlapping
    /// matches are resolved to the first and logged.
    pub fn find(&self, nx: f64, ny: f64) -> Option<&Area> {
        let mut matches = self.areas.iter().filter(|a| a.contains(nx, ny));
        let first = matches.next()?;
        if let Some(second) = matches.next() {
            tracing::warn!(
                nx = nx,
                ny = ny,
                first = %first.area_name,
                also = %second.area_name,
                "Point matches multiple zones, using first"
            );
        }
        Some(first)
    }

    pub fn name_of(&self, area_id: u8) -> Option<&str> {
        self.names.get(&area_id).map(|s| s.as_str())
    }

    /// Wire name for an optional zone id; unresolved zones print as UNKNOWN
    pub fn wire_name(&self, area_id: Option<u8>) -> String {
        area_id
            .and_then(|id| self.name_of(id))
            .unwrap_or("UNKNOWN")
            .to_string()
    }
}

/// Map plane geometry
#[derive(Debug, Clone, Copy)]
pub struct MapGeometry {
    /// Logical display plane
    pub map_width: f64,
    pub map_height: f64,
    /// Physical plane (mm), homography output range
    pub real_width: f64,
    pub real_height: f64,
}

impl MapGeometry {
    pub fn new(map_width: f64, map_height: f64, real_width: f64, real_height: f64) -> Self {
        Self {
            map_width,
            map_height,
            real_width,
            real_height,
        }
    }
}

/// Apply a 3x3 homography with perspective divide. Returns None when the
/// matrix is degenerate at this point (w ~ 0).
fn apply_homography(m: &[[f64; 3]; 3], x: f64, y: f64) -> Option<(f64, f64)> {
    let w = m[2][0] * x + m[2][1] * y + m[2][2];
    if w.abs() < 1e-12 {
        return None;
    }
    let wx = (m[0][0] * x + m[0][1] * y + m[0][2]) / w;
    let wy = (m[1][0] * x + m[1][1] * y + m[1][2]) / w;
    Some((wx, wy))
}

/// Coordinate transformer over the static geometry and zone table
pub struct CoordTransformer {
    geometry: MapGeometry,
}

impl CoordTransformer {
    pub fn new(geometry: MapGeometry) -> Self {
        Self { geometry }
    }

    /// Convert one detection. `calibration` comes from the camera's store
    /// entry; `frame_size` from the owning frame when known.
    pub fn locate(
        &self,
        detection: Detection,
        calibration: Option<&CalibrationRecord>,
        frame_size: Option<(f64, f64)>,
        areas: &AreaTable,
    ) -> LocatedDetection {
        let (cx, cy) = detection.bbox.centroid();

        let (norm_x, norm_y) = match calibration {
            Some(record) => match apply_homography(&record.matrix, cx, cy) {
                Some((wx, wy)) => (
                    wx / self.geometry.real_width,
                    wy / self.geometry.real_height,
                ),
                None => {
                    tracing::warn!(
                        object_id = detection.object_id,
                        "Homography degenerate at centroid, using frame-relative fallback"
                    );
                    self.frame_relative(cx, cy, frame_size)
                }
            },
            None => self.frame_relative(cx, cy, frame_size),
        };

        let map_x = norm_x * self.geometry.map_width;
        let map_y = norm_y * self.geometry.map_height;
        let area_id = areas.find(norm_x, norm_y).map(|a| a.area_id);

        LocatedDetection {
            detection,
            norm_x,
            norm_y,
            map_x,
            map_y,
            area_id,
        }
    }

    fn frame_relative(&self, cx: f64, cy: f64, frame_size: Option<(f64, f64)>) -> (f64, f64) {
        let (fw, fh) = frame_size.unwrap_or((DEFAULT_FRAME_WIDTH, DEFAULT_FRAME_HEIGHT));
        (cx / fw, cy / fh)
    }
}

/// The zone layout seeded into the AREA table
pub fn default_area_rows() -> Vec<Area> {
    let rows: [(u8, &str, f64, f64, f64, f64); 8] = [
        (1, "TWY_A", 0.00, 0.23, 0.19, 0.52),
        (2, "TWY_B", 0.81, 0.23, 1.00, 0.52),
        (3, "TWY_C", 0.00, 0.73, 0.19, 1.00),
        (4, "TWY_D", 0.81, 0.73, 1.00, 1.00),
        (5, "RWY_A", 0.00, 0.00, 1.00, 0.23),
        (6, "RWY_B", 0.00, 0.52, 1.00, 0.73),
        (7, "GRASS_A", 0.19, 0.23, 0.81, 0.52),
        (8, "GRASS_B", 0.19, 0.73, 0.81, 1.00),
    ];
    rows.iter()
        .map(|&(area_id, name, x1, y1, x2, y2)| Area {
            area_id,
            area_name: name.to_string(),
            x1,
            y1,
            x2,
            y2,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BBox, ObjectClass};

    const IDENTITY: [[f64; 3]; 3] = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

    fn geometry() -> MapGeometry {
        MapGeometry::new(960.0, 720.0, 1800.0, 1350.0)
    }

    fn detection(bbox: BBox) -> Detection {
        Detection {
            object_id: 1001,
            class: ObjectClass::Fod,
            bbox,
            confidence: 0.92,
            pose: None,
        }
    }

    #[test]
    fn homography_identity_maps_pixels_to_millimetres() {
        let (wx, wy) = apply_homography(&IDENTITY, 420.0, 320.0).unwrap();
        assert_eq!((wx, wy), (420.0, 320.0));
    }

    #[test]
    fn homography_perspective_divide() {
        // scale-by-w matrix: w = 2 everywhere
        let m = [[2.0, 0.0, 0.0], [0.0, 2.0, 0.0], [0.0, 0.0, 2.0]];
        let (wx, wy) = apply_homography(&m, 100.0, 50.0).unwrap();
        assert!((wx - 100.0).abs() < 1e-9);
        assert!((wy - 50.0).abs() < 1e-9);
    }

    #[test]
    fn degenerate_matrix_is_rejected() {
        let m = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 0.0]];
        assert!(apply_homography(&m, 10.0, 10.0).is_none());
    }

    #[test]
    fn calibrated_locate_normalizes_against_real_plane() {
        let transformer = CoordTransformer::new(geometry());
        let areas = AreaTable::new(default_area_rows());
        let record = CalibrationRecord {
            matrix: IDENTITY,
            scale: 1.0,
            received_at: Utc::now(),
        };
        // centroid (900, 675) mm -> normalized (0.5, 0.5) -> map (480, 360)
        let located = transformer.locate(
            detection(BBox { x1: 880.0, y1: 655.0, x2: 920.0, y2: 695.0 }),
            Some(&record),
            None,
            &areas,
        );
        assert!((located.norm_x - 0.5).abs() < 1e-9);
        assert!((located.norm_y - 0.5).abs() < 1e-9);
        assert_eq!(located.map_point(), (480, 360));
        // (0.5, 0.5) falls inside GRASS_A
        assert_eq!(located.area_id, Some(7));
    }

    #[test]
    fn uncalibrated_locate_uses_frame_relative_fallback() {
        let transformer = CoordTransformer::new(geometry());
        let areas = AreaTable::new(default_area_rows());
        let located = transformer.locate(
            detection(BBox { x1: 310.0, y1: 230.0, x2: 330.0, y2: 250.0 }),
            None,
            Some((640.0, 480.0)),
            &areas,
        );
        // centroid (320, 240) on 640x480 -> (0.5, 0.5)
        assert!((located.norm_x - 0.5).abs() < 1e-9);
        assert!((located.norm_y - 0.5).abs() < 1e-9);
        assert_eq!(located.map_point(), (480, 360));
    }

    #[test]
    fn area_lookup_round_trip() {
        let areas = AreaTable::new(default_area_rows());
        // every seeded area's centre resolves back to that area
        for area in areas.areas() {
            let cx = (area.x1 + area.x2) / 2.0;
            let cy = (area.y1 + area.y2) / 2.0;
            let found = areas.find(cx, cy).unwrap();
            assert_eq!(found.area_id, area.area_id, "centre of {}", area.area_name);
        }
    }

    #[test]
    fn unzoned_point_resolves_to_none() {
        let areas = AreaTable::new(default_area_rows());
        assert!(areas.find(1.5, 0.5).is_none());
        assert_eq!(areas.wire_name(None), "UNKNOWN");
        assert_eq!(areas.wire_name(Some(5)), "RWY_A");
    }

    #[tokio::test]
    async fn calibration_store_round_trip() {
        let store = CalibrationStore::new();
        assert_eq!(store.calibrated_count().await, 0);
        store.set("A", IDENTITY, 2.5).await;
        store.set("B", IDENTITY, 1.0).await;
        assert_eq!(store.calibrated_count().await, 2);
        let record = store.get("A").await.unwrap();
        assert_eq!(record.scale, 2.5);
        store.clear().await;
        assert!(store.get("A").await.is_none());
    }
}
