//! Bird-risk channel: level changes from the external estimator

use crate::fanout_hub::ClientRole;
use crate::models::BirdRiskLevel;
use crate::protocol::bird::BirdMessage;
use crate::protocol::controller::encode_bird_risk;
use crate::protocol::pilot::bird_risk_changed_event;
use crate::state::AppState;
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

pub async fn run_listener(listener: TcpListener, state: AppState) {
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                tracing::info!(peer = %peer, "Bird-risk estimator connected");
                let state = state.clone();
                tokio::spawn(handle_session(socket, state));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Bird-risk accept failed");
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    }
}

async fn handle_session(socket: TcpStream, state: AppState) {
    let mut reader = BufReader::new(socket);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Bird-risk read failed");
                break;
            }
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let message = match serde_json::from_str::<BirdMessage>(trimmed) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed bird-risk message dropped");
                continue;
            }
        };
        let BirdMessage::Event { event, result } = message;
        if event != "BR_CHANGED" {
            tracing::warn!(event = %event, "Unknown bird-risk event");
            continue;
        }
        let Some(level) = BirdRiskLevel::parse(&result) else {
            tracing::warn!(result = %result, "Unknown bird-risk level");
            continue;
        };

        let prev = {
            let mut current = state.bird_risk.write().await;
            let prev = *current;
            *current = level;
            prev
        };
        if prev == level {
            tracing::debug!(level = %level.code(), "Bird risk unchanged");
            continue;
        }

        tracing::info!(prev = %prev.code(), curr = %level.code(), "Bird risk changed");
        if let Err(e) = state
            .repository
            .append_bird_risk(prev, level, Utc::now())
            .await
        {
            tracing::error!(error = %e, "Bird-risk log append failed");
        }

        state
            .hub
            .broadcast(ClientRole::Controller, encode_bird_risk(level).as_bytes())
            .await;
        state
            .hub
            .broadcast(
                ClientRole::Pilot,
                bird_risk_changed_event(level).as_bytes(),
            )
            .await;
    }
    tracing::info!("Bird-risk estimator disconnected");
}
