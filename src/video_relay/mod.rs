//! VideoRelay - Subscribed Camera Frame Forwarding
//!
//! ## Responsibilities
//!
//! - Forward new frames of a session's subscribed camera as `CID:JPEG`
//!   datagrams to the controller's relay port
//! - Per-session throttle: at most 5 pending datagrams, oldest dropped
//!   first (liveness over completeness)
//!
//! One sender task per subscribed session, all sharing the outbound socket.

use crate::fanout_hub::FanoutHub;
use crate::frame_bus::FrameBus;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

/// Pending datagrams per session before the oldest is dropped
pub const SESSION_RELAY_DEPTH: usize = 5;

/// Bounded drop-oldest datagram queue
pub struct SendQueue {
    inner: Mutex<VecDeque<Vec<u8>>>,
    notify: Notify,
    closed: AtomicBool,
}

impl SendQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue a datagram, dropping the oldest when the queue is full.
    /// Returns the number of datagrams dropped (0 or 1).
    pub async fn push(&self, datagram: Vec<u8>) -> usize {
        let mut queue = self.inner.lock().await;
        let mut dropped = 0;
        while queue.len() >= SESSION_RELAY_DEPTH {
            queue.pop_front();
            dropped += 1;
        }
        queue.push_back(datagram);
        drop(queue);
        self.notify.notify_one();
        dropped
    }

    /// Wait for the next datagram; None once closed and drained
    pub async fn pop(&self) -> Option<Vec<u8>> {
        loop {
            {
                let mut queue = self.inner.lock().await;
                if let Some(datagram) = queue.pop_front() {
                    return Some(datagram);
                }
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}

impl Default for SendQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// `CID:JPEG` outbound datagram
pub fn compose_datagram(camera_id: &str, jpeg: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(camera_id.len() + 1 + jpeg.len());
    out.extend_from_slice(camera_id.as_bytes());
    out.push(b':');
    out.extend_from_slice(jpeg);
    out
}

/// VideoRelay instance
pub struct VideoRelay {
    socket: Arc<UdpSocket>,
    hub: Arc<FanoutHub>,
    bus: Arc<FrameBus>,
    /// Destination port on the controller host
    relay_port: u16,
}

impl VideoRelay {
    pub fn new(socket: UdpSocket, hub: Arc<FanoutHub>, bus: Arc<FrameBus>, relay_port: u16) -> Self {
        Self {
            socket: Arc::new(socket),
            hub,
            bus,
            relay_port,
        }
    }

    /// Relay loop: dispatch each frame arrival to the queues of sessions
    /// subscribed to that camera, spawning sender tasks on first use.
    pub async fn run(self: Arc<Self>) {
        let mut arrivals = self.bus.subscribe();
        let mut queues: HashMap<Uuid, Arc<SendQueue>> = HashMap::new();

        loop {
            let arrival = match arrivals.recv().await {
                Ok(arrival) => arrival,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::debug!(missed = missed, "Relay lagged behind frame arrivals");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            };

            let subscriptions = self.hub.subscriptions().await;

            // prune sessions that unsubscribed or disconnected
            let active: Vec<Uuid> = subscriptions.iter().map(|(id, _, _)| *id).collect();
            queues.retain(|id, queue| {
                if active.contains(id) {
                    true
                } else {
                    queue.close();
                    false
                }
            });

            let mut payload: Option<Vec<u8>> = None;
            for (session_id, peer, camera) in subscriptions {
                if camera.to_string() != arrival.camera_id {
                    continue;
                }
                let datagram = match &payload {
                    Some(bytes) => bytes.clone(),
                    None => {
                        let Some(frame) = self.bus.get(&arrival.camera_id, arrival.frame_id).await
                        else {
                            break; // already evicted
                        };
                        let bytes = compose_datagram(&arrival.camera_id, &frame.jpeg);
                        payload = Some(bytes.clone());
                        bytes
                    }
                };

                let queue = queues.entry(session_id).or_insert_with(|| {
                    let queue = Arc::new(SendQueue::new());
                    let target = SocketAddr::new(peer.ip(), self.relay_port);
                    tokio::spawn(run_sender(self.socket.clone(), queue.clone(), target));
                    queue
                });
                let dropped = queue.push(datagram).await;
                if dropped > 0 {
                    tracing::debug!(session_id = %session_id, "Relay queue full, dropped oldest frame");
                }
            }
        }
    }
}

async fn run_sender(socket: Arc<UdpSocket>, queue: Arc<SendQueue>, target: SocketAddr) {
    tracing::info!(target = %target, "Video relay sender started");
    while let Some(datagram) = queue.pop().await {
        if let Err(e) = socket.send_to(&datagram, target).await {
            tracing::warn!(target = %target, error = %e, "Relay send failed");
        }
    }
    tracing::info!(target = %target, "Video relay sender stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datagram_has_camera_prefix() {
        let out = compose_datagram("A", &[0xFF, 0xD8]);
        assert_eq!(out, vec![b'A', b':', 0xFF, 0xD8]);
    }

    #[tokio::test]
    async fn queue_drops_oldest_beyond_depth() {
        let queue = SendQueue::new();
        for i in 0..SESSION_RELAY_DEPTH {
            assert_eq!(queue.push(vec![i as u8]).await, 0);
        }
        assert_eq!(queue.push(vec![99]).await, 1);

        // oldest (0) was dropped; 1..5 then 99 remain
        assert_eq!(queue.pop().await.unwrap(), vec![1]);
        let mut last = Vec::new();
        for _ in 0..SESSION_RELAY_DEPTH - 1 {
            last = queue.pop().await.unwrap();
        }
        assert_eq!(last, vec![99]);
    }

    #[tokio::test]
    async fn closed_queue_drains_then_ends() {
        let queue = SendQueue::new();
        queue.push(vec![1]).await;
        queue.close();
        assert_eq!(queue.pop().await.unwrap(), vec![1]);
        assert!(queue.pop().await.is_none());
    }
}
