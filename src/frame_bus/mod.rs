//! FrameBus - Camera Frame Ingest
//!
//! ## Responsibilities
//!
//! - Receive raw camera frames over UDP (`CID:FID:JPEG`)
//! - Keep a bounded per-camera ring buffer keyed by frame id
//! - Serve `latest` / `get` lookups for the relay and the pipeline
//! - Announce frame arrivals to relay subscribers
//!
//! Frames are evicted on overflow (oldest first) and by age; the ring never
//! holds frames older than the configured cap.

use crate::error::{Error, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, RwLock};
use tokio::time::{Duration, Instant};

/// One buffered camera frame
#[derive(Debug, Clone)]
pub struct Frame {
    pub camera_id: String,
    pub frame_id: i64,
    pub jpeg: Vec<u8>,
    pub received_at: Instant,
}

/// Announcement of a newly buffered frame
#[derive(Debug, Clone)]
pub struct FrameArrival {
    pub camera_id: String,
    pub frame_id: i64,
}

struct CameraRing {
    frames: VecDeque<Frame>,
}

/// FrameBus instance
pub struct FrameBus {
    rings: RwLock<HashMap<String, CameraRing>>,
    capacity: usize,
    max_age: Duration,
    arrivals: broadcast::Sender<FrameArrival>,
    malformed: AtomicU64,
}

impl FrameBus {
    pub fn new(capacity: usize, max_age_ms: u64) -> Self {
        let (arrivals, _) = broadcast::channel(64);
        Self {
            rings: RwLock::new(HashMap::new()),
            capacity,
            max_age: Duration::from_millis(max_age_ms),
            arrivals,
            malformed: AtomicU64::new(0),
        }
    }

    /// Subscribe to frame arrival announcements (used by the video relay)
    pub fn subscribe(&self) -> broadcast::Receiver<FrameArrival> {
        self.arrivals.subscribe()
    }

    /// Insert a frame, evicting over-capacity and over-age entries
    pub async fn insert(&self, camera_id: &str, frame_id: i64, jpeg: Vec<u8>) {
        let now = Instant::now();
        {
            let mut rings = self.rings.write().await;
            let ring = rings
                .entry(camera_id.to_string())
                .or_insert_with(|| CameraRing {
                    frames: VecDeque::new(),
                });

            while ring.frames.len() >= self.capacity {
                ring.frames.pop_front();
            }
            while let Some(front) = ring.frames.front() {
                if now.duration_since(front.received_at) >= self.max_age {
                    ring.frames.pop_front();
                } else {
                    break;
                }
            }
            ring.frames.push_back(Frame {
                camera_id: camera_id.to_string(),
                frame_id,
                jpeg,
                received_at: now,
            });
        }

        let _ = self.arrivals.send(FrameArrival {
            camera_id: camera_id.to_string(),
            frame_id,
        });
    }

    /// Most recent frame for a camera; stale frames are never served even
    /// when the sweep has not collected them yet
    pub async fn latest(&self, camera_id: &str) -> Option<Frame> {
        let now = Instant::now();
        let rings = self.rings.read().await;
        rings
            .get(camera_id)?
            .frames
            .back()
            .filter(|f| now.duration_since(f.received_at) < self.max_age)
            .cloned()
    }

    /// Exact frame lookup by id
    pub async fn get(&self, camera_id: &str, frame_id: i64) -> Option<Frame> {
        let now = Instant::now();
        let rings = self.rings.read().await;
        rings
            .get(camera_id)?
            .frames
            .iter()
            .find(|f| f.frame_id == frame_id)
            .filter(|f| now.duration_since(f.received_at) < self.max_age)
            .cloned()
    }

    /// Evict every frame at or past the age cap, across all cameras
    pub async fn age_out(&self) {
        let now = Instant::now();
        let mut rings = self.rings.write().await;
        for ring in rings.values_mut() {
            while let Some(front) = ring.frames.front() {
                if now.duration_since(front.received_at) >= self.max_age {
                    ring.frames.pop_front();
                } else {
                    break;
                }
            }
        }
    }

    pub fn record_malformed(&self) -> u64 {
        self.malformed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn malformed_count(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }
}

/// Parse a `CID:FID:JPEG` datagram. The header is ASCII up to the second
/// colon; the remainder is the payload.
pub fn parse_datagram(buf: &[u8]) -> Result<(String, i64, &[u8])> {
    let first = buf
        .iter()
        .position(|&b| b == b':')
        .ok_or_else(|| Error::Protocol("datagram missing camera id separator".into()))?;
    let second = buf[first + 1..]
        .iter()
        .position(|&b| b == b':')
        .map(|p| first + 1 + p)
        .ok_or_else(|| Error::Protocol("datagram missing frame id separator".into()))?;

    let camera_id = std::str::from_utf8(&buf[..first])
        .map_err(|_| Error::Protocol("camera id is not ASCII".into()))?;
    if camera_id.is_empty() {
        return Err(Error::Protocol("empty camera id".into()));
    }
    let frame_id: i64 = std::str::from_utf8(&buf[first + 1..second])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::Protocol("frame id is not a decimal timestamp".into()))?;

    Ok((camera_id.to_string(), frame_id, &buf[second + 1..]))
}

/// UDP reader loop: one task for the camera frame socket. Malformed
/// datagrams are dropped and counted; receive errors are logged and the
/// loop continues.
pub async fn run_reader(bus: Arc<FrameBus>, socket: UdpSocket, buffer_size: usize) {
    let mut buf = vec![0u8; buffer_size];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, _peer)) => match parse_datagram(&buf[..len]) {
                Ok((camera_id, frame_id, payload)) => {
                    bus.insert(&camera_id, frame_id, payload.to_vec()).await;
                }
                Err(e) => {
                    let total = bus.record_malformed();
                    tracing::warn!(error = %e, total = total, "Dropped malformed camera datagram");
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "Camera frame socket receive failed");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
}

/// Periodic age-out sweep
pub async fn run_age_out(bus: Arc<FrameBus>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        bus.age_out().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_datagram() {
        let mut data = b"A:1718135772191843820:".to_vec();
        data.extend_from_slice(&[0xFF, 0xD8, 0xFF, 0xE0]);
        let (cam, fid, payload) = parse_datagram(&data).unwrap();
        assert_eq!(cam, "A");
        assert_eq!(fid, 1_718_135_772_191_843_820);
        assert_eq!(payload, &[0xFF, 0xD8, 0xFF, 0xE0]);
    }

    #[test]
    fn rejects_malformed_datagrams() {
        assert!(parse_datagram(b"no-separator").is_err());
        assert!(parse_datagram(b"A:12345").is_err());
        assert!(parse_datagram(b":123:xx").is_err());
        assert!(parse_datagram(b"A:notanumber:xx").is_err());
    }

    #[tokio::test]
    async fn ring_keeps_latest_and_exact_lookup() {
        let bus = FrameBus::new(60, 2000);
        bus.insert("A", 100, vec![1]).await;
        bus.insert("A", 200, vec![2]).await;
        bus.insert("B", 150, vec![3]).await;

        assert_eq!(bus.latest("A").await.unwrap().frame_id, 200);
        assert_eq!(bus.get("A", 100).await.unwrap().jpeg, vec![1]);
        assert_eq!(bus.latest("B").await.unwrap().jpeg, vec![3]);
        assert!(bus.get("A", 999).await.is_none());
        assert!(bus.latest("C").await.is_none());
    }

    #[tokio::test]
    async fn overflow_evicts_oldest() {
        let bus = FrameBus::new(3, 60_000);
        for i in 0..5 {
            bus.insert("A", i, vec![i as u8]).await;
        }
        assert!(bus.get("A", 0).await.is_none());
        assert!(bus.get("A", 1).await.is_none());
        assert!(bus.get("A", 2).await.is_some());
        assert_eq!(bus.latest("A").await.unwrap().frame_id, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn age_cap_evicts_at_exactly_two_seconds() {
        let bus = FrameBus::new(60, 2000);
        bus.insert("A", 1, vec![1]).await;
        tokio::time::advance(Duration::from_millis(1999)).await;
        bus.age_out().await;
        assert!(bus.get("A", 1).await.is_some());

        tokio::time::advance(Duration::from_millis(1)).await;
        bus.age_out().await;
        assert!(bus.get("A", 1).await.is_none());
    }

    #[tokio::test]
    async fn arrivals_are_announced() {
        let bus = FrameBus::new(60, 2000);
        let mut rx = bus.subscribe();
        bus.insert("A", 42, vec![9]).await;
        let arrival = rx.recv().await.unwrap();
        assert_eq!(arrival.camera_id, "A");
        assert_eq!(arrival.frame_id, 42);
    }

    #[test]
    fn malformed_counter_increments() {
        let bus = FrameBus::new(60, 2000);
        assert_eq!(bus.malformed_count(), 0);
        assert_eq!(bus.record_malformed(), 1);
        assert_eq!(bus.record_malformed(), 2);
        assert_eq!(bus.malformed_count(), 2);
    }
}
