//! Controller channel: line commands from the ATC GUI
//!
//! Subscription, access-control, detail and history commands. Replies go
//! through the session's hub queue so they interleave consistently with
//! event broadcasts.

use super::{run_session_writer, COMMAND_TIMEOUT};
use crate::fanout_hub::ClientRole;
use crate::protocol::controller::{
    encode_access_levels, encode_history_image, encode_object_detail, parse_command,
    ControllerCommand,
};
use crate::state::AppState;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use uuid::Uuid;

const ISO8601: &str = "%Y-%m-%dT%H:%M:%SZ";

pub async fn run_listener(listener: TcpListener, state: AppState) {
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                let state = state.clone();
                tokio::spawn(handle_session(socket, peer, state));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Controller accept failed");
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    }
}

async fn handle_session(socket: TcpStream, peer: std::net::SocketAddr, state: AppState) {
    let (read_half, write_half) = socket.into_split();
    let (session_id, rx) = state.hub.register(ClientRole::Controller, peer).await;
    tokio::spawn(run_session_writer(write_half, rx));

    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Controller read failed");
                break;
            }
        }
        if line.trim().is_empty() {
            continue;
        }

        let reply = match parse_command(&line) {
            Ok(command) => {
                tracing::debug!(session_id = %session_id, command = ?command, "Controller command");
                match tokio::time::timeout(
                    COMMAND_TIMEOUT,
                    handle_command(&state, &session_id, &command),
                )
                .await
                {
                    Ok(reply) => reply,
                    Err(_) => {
                        tracing::warn!(session_id = %session_id, command = ?command, "Command handling timed out");
                        timeout_reply(&command).as_bytes().to_vec()
                    }
                }
            }
            Err(failure) => {
                tracing::warn!(session_id = %session_id, line = %line.trim(), "Unparseable controller command");
                failure.reply.as_bytes().to_vec()
            }
        };
        state.hub.send_to(&session_id, reply).await;
    }

    state.hub.unregister(&session_id).await;
}

/// Error form per command family when the 5 s handling deadline passes
fn timeout_reply(command: &ControllerCommand) -> &'static str {
    match command {
        ControllerCommand::ReadAccess => "AH_AC:ERROR\n",
        ControllerCommand::UpdateAccess(_) => "AH_UA:ERROR\n",
        ControllerCommand::ObjectDetail(_) => "MR_OD:ERR,2\n",
        ControllerCommand::HistoryEvents { .. } => "LR_OL:ERR,3\n",
        ControllerCommand::HistoryImage(_) => "LR_OI:ERR,5\n",
        ControllerCommand::HistoryBirdRisk { .. } => "LR_BL:ERR,3\n",
        ControllerCommand::HistoryInteractions { .. } => "LR_RL:ERR,3\n",
        _ => "MR_ERROR:Timeout\n",
    }
}

async fn handle_command(
    state: &AppState,
    session_id: &Uuid,
    command: &ControllerCommand,
) -> Vec<u8> {
    match command {
        ControllerCommand::SubscribeCameraA => {
            state.hub.set_subscription(session_id, Some('A')).await;
            b"MR_CA:OK\n".to_vec()
        }
        ControllerCommand::SubscribeCameraB => {
            state.hub.set_subscription(session_id, Some('B')).await;
            b"MR_CB:OK\n".to_vec()
        }
        ControllerCommand::MapView => {
            state.hub.set_subscription(session_id, None).await;
            b"MR_MP:OK\n".to_vec()
        }
        ControllerCommand::ReadAccess => {
            encode_access_levels(&state.access.level_vector().await).into_bytes()
        }
        ControllerCommand::UpdateAccess(levels) => {
            // cache follows the DB commit; the ACK follows both
            match state.repository.update_access_conditions(*levels).await {
                Ok(()) => {
                    let committed = state
                        .repository
                        .load_access_conditions()
                        .await
                        .unwrap_or(*levels);
                    state.access.replace(committed).await;
                    b"AH_UA:OK\n".to_vec()
                }
                Err(e) => {
                    tracing::error!(error = %e, "Access condition update failed");
                    b"AH_UA:ERROR\n".to_vec()
                }
            }
        }
        ControllerCommand::ObjectDetail(object_id) => object_detail(state, *object_id).await,
        ControllerCommand::HistoryEvents { from, to } => history_events(state, from, to).await,
        ControllerCommand::HistoryImage(object_id) => history_image(state, *object_id).await,
        ControllerCommand::HistoryBirdRisk { from, to } => history_bird_risk(state, from, to).await,
        ControllerCommand::HistoryInteractions { from, to } => {
            history_interactions(state, from, to).await
        }
    }
}

async fn object_detail(state: &AppState, object_id: i64) -> Vec<u8> {
    let detail = match state.repository.get_event_by_object_id(object_id).await {
        Ok(Some(detail)) => detail,
        Ok(None) => return b"MR_OD:ERR,3\n".to_vec(),
        Err(e) => {
            tracing::error!(object_id = object_id, error = %e, "Object detail lookup failed");
            return b"MR_OD:ERR,2\n".to_vec();
        }
    };
    if detail.img_path.is_empty() {
        return b"MR_OD:ERR,4\n".to_vec();
    }
    match state.repository.load_image(&detail.img_path).await {
        Ok(image) => encode_object_detail(
            detail.object_id,
            &detail.object_type_name,
            &detail.area_name,
            &detail.timestamp.format(ISO8601).to_string(),
            &image,
        ),
        Err(e) => {
            tracing::error!(object_id = object_id, error = %e, "Stored image unreadable");
            b"MR_OD:ERR,5\n".to_vec()
        }
    }
}

async fn history_events(state: &AppState, from: &str, to: &str) -> Vec<u8> {
    match state.repository.query_history(from, to, &[]).await {
        Ok(events) => {
            let entries = events
                .iter()
                .map(|e| {
                    format!(
                        "{},{},{},{},{}",
                        e.event_type_name,
                        e.object_id,
                        e.object_type_name,
                        e.area_name,
                        e.timestamp.format(ISO8601)
                    )
                })
                .collect::<Vec<_>>()
                .join(";");
            format!("LR_OL:OK,{entries}\n").into_bytes()
        }
        Err(e) => {
            tracing::error!(error = %e, "Event history query failed");
            b"LR_OL:ERR,3\n".to_vec()
        }
    }
}

async fn history_image(state: &AppState, object_id: i64) -> Vec<u8> {
    let detail = match state.repository.get_event_by_object_id(object_id).await {
        Ok(Some(detail)) => detail,
        Ok(None) => return b"LR_OI:ERR,3\n".to_vec(),
        Err(e) => {
            tracing::error!(object_id = object_id, error = %e, "History image lookup failed");
            return b"LR_OI:ERR,2\n".to_vec();
        }
    };
    if detail.img_path.is_empty() {
        return b"LR_OI:ERR,4\n".to_vec();
    }
    match state.repository.load_image(&detail.img_path).await {
        Ok(image) => encode_history_image(&image),
        Err(e) => {
            tracing::error!(object_id = object_id, error = %e, "Stored image unreadable");
            b"LR_OI:ERR,5\n".to_vec()
        }
    }
}

async fn history_bird_risk(state: &AppState, from: &str, to: &str) -> Vec<u8> {
    match state.repository.query_bird_risk_history(from, to).await {
        Ok(entries) => {
            let joined = entries
                .iter()
                .map(|e| format!("{},{}", e.level_id, e.timestamp.format(ISO8601)))
                .collect::<Vec<_>>()
                .join(";");
            format!("LR_BL:OK,{joined}\n").into_bytes()
        }
        Err(e) => {
            tracing::error!(error = %e, "Bird risk history query failed");
            b"LR_BL:ERR,3\n".to_vec()
        }
    }
}

async fn history_interactions(state: &AppState, from: &str, to: &str) -> Vec<u8> {
    match state.repository.query_interaction_history(from, to).await {
        Ok(entries) => {
            let joined = entries
                .iter()
                .map(|e| {
                    format!(
                        "{},{},{},{}",
                        e.request_id,
                        e.response_id,
                        e.request_time.format(ISO8601),
                        e.response_time.format(ISO8601)
                    )
                })
                .collect::<Vec<_>>()
                .join(";");
            format!("LR_RL:OK,{joined}\n").into_bytes()
        }
        Err(e) => {
            tracing::error!(error = %e, "Interaction history query failed");
            b"LR_RL:ERR,3\n".to_vec()
        }
    }
}
