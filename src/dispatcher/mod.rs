//! Dispatcher - Inbound Channel Handling
//!
//! ## Responsibilities
//!
//! - Accept loops for the four TCP channels (inference, controller, bird,
//!   pilot)
//! - Per-session reader loops: parse, route to handlers, reply
//! - Inference lifecycle (calibration gate, set_mode_object handshake)
//!
//! Malformed input drops the offending line, never the session. A socket
//! error closes only that session; an inference disconnect drops the
//! pipeline back to calibrating.

pub mod bird;
pub mod controller;
pub mod inference;
pub mod pilot;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tokio::time::Duration;

/// Deadline for handling one inbound command
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Writer task for a TCP session: drains the hub queue into the socket.
/// Ends when the queue sender is dropped (session unregistered) or the
/// peer stops accepting writes.
pub(crate) async fn run_session_writer(mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<Vec<u8>>) {
    while let Some(message) = rx.recv().await {
        if let Err(e) = writer.write_all(&message).await {
            tracing::debug!(error = %e, "Session write failed, stopping writer");
            break;
        }
    }
    let _ = writer.shutdown().await;
}
