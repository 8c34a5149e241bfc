//! Inference channel: JSON-line events from the object-detection worker
//!
//! Lifecycle per connection:
//!
//! ```text
//! Calibrating -> AwaitingAck -> Operating
//!      ^                            |
//!      +------ reconnect ----------+
//! ```
//!
//! Object events are delivered to the pipeline only in Operating. The
//! owning frame's JPEG is fetched at event receipt so first-detection
//! cropping cannot race the frame ring's age-out.

use crate::fanout_hub::ClientRole;
use crate::pipeline::PipelineJob;
use crate::protocol::controller::encode_map_calibrated;
use crate::protocol::inference::{
    set_mode_object_line, InferenceEvent, InferenceMessage,
};
use crate::state::AppState;
use std::collections::HashSet;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// Cameras that must calibrate before object mode is requested
const REQUIRED_CALIBRATIONS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Calibrating,
    AwaitingAck,
    Operating,
}

pub async fn run_listener(listener: TcpListener, state: AppState) {
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                tracing::info!(peer = %peer, "Inference worker connected");
                let state = state.clone();
                tokio::spawn(async move {
                    handle_session(socket, state).await;
                    tracing::info!(peer = %peer, "Inference worker disconnected, back to calibrating");
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "Inference accept failed");
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    }
}

async fn handle_session(socket: TcpStream, state: AppState) {
    let (read_half, mut write_half) = socket.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    let mut stage = Stage::Calibrating;
    let mut calibrated: HashSet<String> = HashSet::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Inference read failed");
                break;
            }
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let message = match serde_json::from_str::<InferenceMessage>(trimmed) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed inference message dropped");
                continue;
            }
        };

        match message {
            InferenceMessage::Event(InferenceEvent::ObjectDetected {
                camera_id,
                img_id,
                detections,
            }) => {
                if stage != Stage::Operating {
                    tracing::debug!(
                        camera_id = %camera_id,
                        stage = ?stage,
                        "Object event before operating stage, dropped"
                    );
                    continue;
                }

                let mut parsed = Vec::with_capacity(detections.len());
                for wire in detections {
                    let class = wire.class.clone();
                    match wire.into_detection() {
                        Some(det) => parsed.push(det),
                        None => {
                            tracing::warn!(class = %class, "Unknown object class dropped")
                        }
                    }
                }

                let frame_jpeg = state
                    .frame_bus
                    .get(&camera_id, img_id)
                    .await
                    .map(|frame| frame.jpeg);
                let job = PipelineJob {
                    camera_id,
                    frame_id: img_id,
                    detections: parsed,
                    frame_jpeg,
                };
                if state.pipeline_tx.send(job).await.is_err() {
                    tracing::error!("Pipeline channel closed, dropping inference session");
                    break;
                }
            }
            InferenceMessage::Event(InferenceEvent::MarkerDetected { camera_id, .. }) => {
                tracing::debug!(camera_id = %camera_id, "Marker event ignored at steady state");
            }
            InferenceMessage::Event(InferenceEvent::MapCalibration {
                camera_id,
                matrix,
                scale,
            }) => {
                state.calibration.set(&camera_id, matrix, scale).await;
                calibrated.insert(camera_id);

                if stage == Stage::Calibrating && calibrated.len() >= REQUIRED_CALIBRATIONS {
                    tracing::info!(
                        cameras = calibrated.len(),
                        "All cameras calibrated, requesting object mode"
                    );
                    if let Err(e) = write_half
                        .write_all(set_mode_object_line().as_bytes())
                        .await
                    {
                        tracing::warn!(error = %e, "Failed to send set_mode_object");
                        break;
                    }
                    stage = Stage::AwaitingAck;
                }
            }
            InferenceMessage::Response(response) => {
                if response.command == "set_mode_object" {
                    if response.is_ok() && stage == Stage::AwaitingAck {
                        stage = Stage::Operating;
                        tracing::info!("Object mode acknowledged, pipeline operating");
                        state
                            .hub
                            .broadcast(ClientRole::Controller, encode_map_calibrated().as_bytes())
                            .await;
                    } else {
                        tracing::warn!(result = %response.result, stage = ?stage, "Unexpected set_mode_object response");
                    }
                } else {
                    tracing::debug!(command = %response.command, "Uncorrelated worker response");
                }
            }
        }
    }
}
