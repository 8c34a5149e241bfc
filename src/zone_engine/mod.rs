//! ZoneEngine - Zone State Machines with Clear Hysteresis
//!
//! ## Responsibilities
//!
//! - One NORMAL/HAZARD state machine per zone
//! - Re-armed clear timer per zone (2 s hysteresis, single deadline heap)
//! - Status fan-out: ME_RA/ME_RB to controllers, status-changed events to
//!   pilots (runway zones only; other zones keep state without wire output)
//!
//! Timers are a lazy priority queue of (deadline, zone) pairs; a popped
//! deadline that was re-armed by a newer detection is pushed back instead
//! of firing.

use crate::fanout_hub::{ClientRole, FanoutHub};
use crate::protocol::{controller, pilot};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

/// Sweep granularity; bounds timer precision
const SWEEP_CAP: Duration = Duration::from_millis(50);

pub const RWY_A_AREA_ID: u8 = 5;
pub const RWY_B_AREA_ID: u8 = 6;

/// Zone status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneStatus {
    Normal,
    Hazard,
}

/// A status change produced by a detection tick or a timer sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneTransition {
    pub area_id: u8,
    pub hazard: bool,
}

struct Inner {
    status: HashMap<u8, ZoneStatus>,
    last_hazard: HashMap<u8, Instant>,
    deadlines: BinaryHeap<Reverse<(Instant, u8)>>,
}

/// ZoneEngine instance
pub struct ZoneEngine {
    inner: Mutex<Inner>,
    clear_after: Duration,
    hub: Arc<FanoutHub>,
}

impl ZoneEngine {
    pub fn new(clear_after_ms: u64, hub: Arc<FanoutHub>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                status: HashMap::new(),
                last_hazard: HashMap::new(),
                deadlines: BinaryHeap::new(),
            }),
            clear_after: Duration::from_millis(clear_after_ms),
            hub,
        }
    }

    /// Record qualifying detections for the given zones. Re-arms each zone's
    /// clear timer and broadcasts HAZARD transitions before returning, so a
    /// caller emitting ME_OD afterwards preserves the status-first ordering.
    pub async fn observe(&self, area_ids: &[u8]) -> Vec<ZoneTransition> {
        let now = Instant::now();
        let mut transitions = Vec::new();
        {
            let mut inner = self.inner.lock().await;
            for &area_id in area_ids {
                inner.last_hazard.insert(area_id, now);
                inner.deadlines.push(Reverse((now + self.clear_after, area_id)));
                let status = inner.status.entry(area_id).or_insert(ZoneStatus::Normal);
                if *status == ZoneStatus::Normal {
                    *status = ZoneStatus::Hazard;
                    transitions.push(ZoneTransition {
                        area_id,
                        hazard: true,
                    });
                }
            }
        }

        for transition in &transitions {
            self.announce(*transition).await;
        }
        transitions
    }

    /// Fire expired clear timers. Returns the zones that transitioned back
    /// to NORMAL (already announced).
    pub async fn sweep_expired(&self) -> Vec<ZoneTransition> {
        let now = Instant::now();
        let mut transitions = Vec::new();
        {
            let mut inner = self.inner.lock().await;
            while let Some(&Reverse((deadline, area_id))) = inner.deadlines.peek() {
                if deadline > now {
                    break;
                }
                inner.deadlines.pop();

                if inner.status.get(&area_id) != Some(&ZoneStatus::Hazard) {
                    continue;
                }
                let rearmed = inner
                    .last_hazard
                    .get(&area_id)
                    .map(|&t| t + self.clear_after)
                    .filter(|&t| t > now);
                match rearmed {
                    Some(later) => inner.deadlines.push(Reverse((later, area_id))),
                    None => {
                        inner.status.insert(area_id, ZoneStatus::Normal);
                        transitions.push(ZoneTransition {
                            area_id,
                            hazard: false,
                        });
                    }
                }
            }
        }

        for transition in &transitions {
            self.announce(*transition).await;
        }
        transitions
    }

    /// Current status of a zone
    pub async fn status(&self, area_id: u8) -> ZoneStatus {
        let inner = self.inner.lock().await;
        inner
            .status
            .get(&area_id)
            .copied()
            .unwrap_or(ZoneStatus::Normal)
    }

    /// Runway view for the pilot protocol: true when the runway zone is clear
    pub async fn runway_clear(&self, runway: char) -> bool {
        let area_id = match runway {
            'A' => RWY_A_AREA_ID,
            _ => RWY_B_AREA_ID,
        };
        self.status(area_id).await == ZoneStatus::Normal
    }

    async fn announce(&self, transition: ZoneTransition) {
        let runway = match transition.area_id {
            RWY_A_AREA_ID => 'A',
            RWY_B_AREA_ID => 'B',
            _ => {
                tracing::debug!(
                    area_id = transition.area_id,
                    hazard = transition.hazard,
                    "Zone transition (no wire status for this zone)"
                );
                return;
            }
        };

        tracing::info!(
            runway = %runway,
            hazard = transition.hazard,
            "Runway status changed"
        );
        let line = controller::encode_runway_status(runway, transition.hazard);
        self.hub
            .broadcast(ClientRole::Controller, line.as_bytes())
            .await;
        let event = pilot::runway_status_changed_event(runway, transition.hazard);
        self.hub.broadcast(ClientRole::Pilot, event.as_bytes()).await;
    }
}

/// Clear-timer task: wakes at next-deadline granularity, capped at 50 ms
pub async fn run_clear_timer(engine: Arc<ZoneEngine>) {
    loop {
        tokio::time::sleep(SWEEP_CAP).await;
        engine.sweep_expired().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> ZoneEngine {
        ZoneEngine::new(2000, Arc::new(FanoutHub::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn first_detection_raises_hazard_once() {
        let engine = engine();
        let transitions = engine.observe(&[RWY_A_AREA_ID]).await;
        assert_eq!(
            transitions,
            vec![ZoneTransition { area_id: RWY_A_AREA_ID, hazard: true }]
        );
        assert_eq!(engine.status(RWY_A_AREA_ID).await, ZoneStatus::Hazard);

        // repeat observation re-arms without a new transition
        let transitions = engine.observe(&[RWY_A_AREA_ID]).await;
        assert!(transitions.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn zone_clears_after_exactly_two_seconds() {
        let engine = engine();
        engine.observe(&[RWY_A_AREA_ID]).await;

        tokio::time::advance(Duration::from_millis(1999)).await;
        assert!(engine.sweep_expired().await.is_empty());
        assert_eq!(engine.status(RWY_A_AREA_ID).await, ZoneStatus::Hazard);

        tokio::time::advance(Duration::from_millis(1)).await;
        let cleared = engine.sweep_expired().await;
        assert_eq!(
            cleared,
            vec![ZoneTransition { area_id: RWY_A_AREA_ID, hazard: false }]
        );
        assert_eq!(engine.status(RWY_A_AREA_ID).await, ZoneStatus::Normal);

        // no duplicate clear on the next sweep
        assert!(engine.sweep_expired().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn new_detection_rearms_the_clear_timer() {
        let engine = engine();
        engine.observe(&[RWY_B_AREA_ID]).await;

        tokio::time::advance(Duration::from_millis(1500)).await;
        engine.observe(&[RWY_B_AREA_ID]).await;

        // original deadline passes but the timer was re-armed
        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(engine.sweep_expired().await.is_empty());
        assert_eq!(engine.status(RWY_B_AREA_ID).await, ZoneStatus::Hazard);

        tokio::time::advance(Duration::from_millis(1400)).await;
        let cleared = engine.sweep_expired().await;
        assert_eq!(cleared.len(), 1);
        assert!(!cleared[0].hazard);
    }

    #[tokio::test(start_paused = true)]
    async fn zones_are_independent() {
        let engine = engine();
        engine.observe(&[RWY_A_AREA_ID]).await;
        tokio::time::advance(Duration::from_millis(1000)).await;
        engine.observe(&[RWY_B_AREA_ID]).await;

        tokio::time::advance(Duration::from_millis(1000)).await;
        let cleared = engine.sweep_expired().await;
        assert_eq!(
            cleared,
            vec![ZoneTransition { area_id: RWY_A_AREA_ID, hazard: false }]
        );
        assert_eq!(engine.status(RWY_B_AREA_ID).await, ZoneStatus::Hazard);
    }

    #[tokio::test(start_paused = true)]
    async fn runway_clear_view() {
        let engine = engine();
        assert!(engine.runway_clear('A').await);
        assert!(engine.runway_clear('B').await);
        engine.observe(&[RWY_A_AREA_ID]).await;
        assert!(!engine.runway_clear('A').await);
        assert!(engine.runway_clear('B').await);
    }

    #[tokio::test(start_paused = true)]
    async fn hazard_broadcast_reaches_controllers_and_pilots() {
        let hub = Arc::new(FanoutHub::new());
        let engine = ZoneEngine::new(2000, hub.clone());
        let peer = "127.0.0.1:1".parse().unwrap();
        let (_cid, mut ctrl_rx) = hub.register(ClientRole::Controller, peer).await;
        let (_pid, mut pilot_rx) = hub.register(ClientRole::Pilot, peer).await;

        engine.observe(&[RWY_A_AREA_ID]).await;

        assert_eq!(ctrl_rx.recv().await.unwrap(), b"ME_RA:1\n");
        let pilot_line = pilot_rx.recv().await.unwrap();
        let value: serde_json::Value =
            serde_json::from_slice(&pilot_line[..pilot_line.len() - 1]).unwrap();
        assert_eq!(value["event"], "RWY_A_STATUS_CHANGED");
        assert_eq!(value["result"], "BLOCKED");

        tokio::time::advance(Duration::from_millis(2000)).await;
        engine.sweep_expired().await;
        assert_eq!(ctrl_rx.recv().await.unwrap(), b"ME_RA:0\n");
    }

    #[tokio::test(start_paused = true)]
    async fn non_runway_zones_track_state_without_wire_output() {
        let hub = Arc::new(FanoutHub::new());
        let engine = ZoneEngine::new(2000, hub.clone());
        let peer = "127.0.0.1:1".parse().unwrap();
        let (_cid, mut ctrl_rx) = hub.register(ClientRole::Controller, peer).await;

        engine.observe(&[1]).await;
        assert_eq!(engine.status(1).await, ZoneStatus::Hazard);
        assert!(ctrl_rx.try_recv().is_err());
    }
}
