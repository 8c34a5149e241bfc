//! FanoutHub - Operator Session Distribution
//!
//! ## Responsibilities
//!
//! - Track connected controller and pilot sessions
//! - Broadcast event messages per role with bounded per-session queues
//! - Hold per-session video subscription flags for the relay
//!
//! A control session whose queue is full is considered stalled and is
//! dropped (the writer task exits when its queue sender is removed).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Outbound queue depth per session
pub const SESSION_QUEUE_DEPTH: usize = 256;

/// Role of a connected operator client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRole {
    Controller,
    Pilot,
}

/// Client connection
struct ClientSession {
    id: Uuid,
    role: ClientRole,
    peer: SocketAddr,
    tx: mpsc::Sender<Vec<u8>>,
    /// Camera currently subscribed for video relay ('A'/'B'), controllers only
    subscribed: Option<char>,
}

/// FanoutHub instance
pub struct FanoutHub {
    sessions: RwLock<HashMap<Uuid, ClientSession>>,
    connection_count: AtomicU64,
}

impl FanoutHub {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            connection_count: AtomicU64::new(0),
        }
    }

    /// Register a new client; returns the session id and the queue drained
    /// by the session's writer task.
    pub async fn register(
        &self,
        role: ClientRole,
        peer: SocketAddr,
    ) -> (Uuid, mpsc::Receiver<Vec<u8>>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(SESSION_QUEUE_DEPTH);

        {
            let mut sessions = self.sessions.write().await;
            sessions.insert(
                id,
                ClientSession {
                    id,
                    role,
                    peer,
                    tx,
                    subscribed: None,
                },
            );
        }
        self.connection_count.fetch_add(1, Ordering::Relaxed);

        tracing::info!(session_id = %id, role = ?role, peer = %peer, "Client connected");
        (id, rx)
    }

    /// Unregister a client
    pub async fn unregister(&self, id: &Uuid) {
        let mut sessions = self.sessions.write().await;
        if sessions.remove(id).is_some() {
            self.connection_count.fetch_sub(1, Ordering::Relaxed);
            tracing::info!(session_id = %id, "Client disconnected");
        }
    }

    /// Broadcast a message to every session of a role. Sessions with a full
    /// queue are stalled and get dropped.
    pub async fn broadcast(&self, role: ClientRole, message: &[u8]) {
        let stalled: Vec<Uuid> = {
            let sessions = self.sessions.read().await;
            sessions
                .values()
                .filter(|s| s.role == role)
                .filter_map(|s| match s.tx.try_send(message.to_vec()) {
                    Ok(()) => None,
                    Err(_) => Some(s.id),
                })
                .collect()
        };

        for id in stalled {
            tracing::warn!(session_id = %id, "Session queue full, dropping session");
            self.unregister(&id).await;
        }
    }

    /// Send to one session; false when the session is gone or stalled
    pub async fn send_to(&self, id: &Uuid, message: Vec<u8>) -> bool {
        let sessions = self.sessions.read().await;
        match sessions.get(id) {
            Some(session) => session.tx.try_send(message).is_ok(),
            None => false,
        }
    }

    /// Set the video subscription for a controller session. Subscribing one
    /// camera toggles the other off; None stops the relay for the session.
    pub async fn set_subscription(&self, id: &Uuid, camera: Option<char>) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(id) {
            session.subscribed = camera;
            tracing::debug!(session_id = %id, camera = ?camera, "Video subscription updated");
        }
    }

    /// Active controller subscriptions: (session id, peer address, camera)
    pub async fn subscriptions(&self) -> Vec<(Uuid, SocketAddr, char)> {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .filter(|s| s.role == ClientRole::Controller)
            .filter_map(|s| s.subscribed.map(|c| (s.id, s.peer, c)))
            .collect()
    }

    pub fn connection_count(&self) -> u64 {
        self.connection_count.load(Ordering::Relaxed)
    }
}

impl Default for FanoutHub {
    fn default() -> Self {
        Self::new()
    }
}
