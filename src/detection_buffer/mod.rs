//! DetectionBuffer - Inference Result Time Alignment
//!
//! ## Responsibilities
//!
//! - Store the latest inference result per camera+frame id
//! - Serve nearest-prior lookups for unlabeled frames (30 fps video vs
//!   5 fps inference)
//!
//! Entries older than the lookup window (200 ms by default) are trimmed on
//! insert. Frame ids are nanosecond timestamps.

use crate::models::Detection;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

const NS_PER_MS: i64 = 1_000_000;

/// DetectionBuffer instance
pub struct DetectionBuffer {
    per_camera: RwLock<HashMap<String, BTreeMap<i64, Vec<Detection>>>>,
    window_ns: i64,
}

impl DetectionBuffer {
    pub fn new(window_ms: u64) -> Self {
        Self {
            per_camera: RwLock::new(HashMap::new()),
            window_ns: window_ms as i64 * NS_PER_MS,
        }
    }

    /// Store the result for a frame and trim entries outside the window
    pub async fn put(&self, camera_id: &str, frame_id: i64, detections: Vec<Detection>) {
        let mut map = self.per_camera.write().await;
        let entries = map.entry(camera_id.to_string()).or_default();
        entries.insert(frame_id, detections);
        let cutoff = frame_id - self.window_ns;
        let recent = entries.split_off(&cutoff);
        *entries = recent;
    }

    /// Exact match if present, else the result for the largest frame id
    /// strictly less than the query and within the window. Empty when no
    /// prior exists.
    pub async fn lookup(&self, camera_id: &str, frame_id: i64) -> Vec<Detection> {
        let map = self.per_camera.read().await;
        let Some(entries) = map.get(camera_id) else {
            return Vec::new();
        };
        if let Some(exact) = entries.get(&frame_id) {
            return exact.clone();
        }
        match entries.range(..frame_id).next_back() {
            Some((&prior_id, detections)) if frame_id - prior_id <= self.window_ns => {
                detections.clone()
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BBox, ObjectClass};

    fn det(object_id: i64) -> Detection {
        Detection {
            object_id,
            class: ObjectClass::Fod,
            bbox: BBox { x1: 0.0, y1: 0.0, x2: 10.0, y2: 10.0 },
            confidence: 0.9,
            pose: None,
        }
    }

    #[tokio::test]
    async fn exact_match_wins() {
        let buffer = DetectionBuffer::new(200);
        buffer.put("A", 1_000, vec![det(1)]).await;
        buffer.put("A", 2_000, vec![det(2)]).await;
        let result = buffer.lookup("A", 1_000).await;
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].object_id, 1);
    }

    #[tokio::test]
    async fn nearest_prior_within_window() {
        let buffer = DetectionBuffer::new(200);
        let base = 1_718_135_772_000_000_000i64;
        buffer.put("A", base, vec![det(7)]).await;

        // 200 ms after: still served
        let result = buffer.lookup("A", base + 200 * NS_PER_MS).await;
        assert_eq!(result.len(), 1);

        // 200 ms + 1 ns after: empty
        let result = buffer.lookup("A", base + 200 * NS_PER_MS + 1).await;
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn strictly_prior_only() {
        let buffer = DetectionBuffer::new(200);
        buffer.put("A", 5_000, vec![det(1)]).await;
        // query below every stored id finds nothing
        assert!(buffer.lookup("A", 4_000).await.is_empty());
    }

    #[tokio::test]
    async fn cameras_are_independent() {
        let buffer = DetectionBuffer::new(200);
        buffer.put("A", 1_000, vec![det(1)]).await;
        assert!(buffer.lookup("B", 1_001).await.is_empty());
    }

    #[tokio::test]
    async fn old_entries_are_trimmed_on_put() {
        let buffer = DetectionBuffer::new(200);
        let base = 1_000_000_000_000i64;
        buffer.put("A", base, vec![det(1)]).await;
        buffer.put("A", base + 300 * NS_PER_MS, vec![det(2)]).await;
        // first entry fell out of the window when the second arrived
        assert!(buffer.lookup("A", base + 1).await.is_empty());
        assert_eq!(
            buffer.lookup("A", base + 301 * NS_PER_MS).await[0].object_id,
            2
        );
    }
}
