//! Pilot channel: JSON query commands and pushed status events

use super::{run_session_writer, COMMAND_TIMEOUT};
use crate::fanout_hub::ClientRole;
use crate::protocol::pilot::{response_type_id, PilotMessage, PilotResponse, RequestCode};
use crate::state::AppState;
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

pub async fn run_listener(listener: TcpListener, state: AppState) {
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                let state = state.clone();
                tokio::spawn(handle_session(socket, peer, state));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Pilot accept failed");
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    }
}

async fn handle_session(socket: TcpStream, peer: std::net::SocketAddr, state: AppState) {
    let (read_half, write_half) = socket.into_split();
    let (session_id, rx) = state.hub.register(ClientRole::Pilot, peer).await;
    tokio::spawn(run_session_writer(write_half, rx));

    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Pilot read failed");
                break;
            }
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<PilotMessage>(trimmed) {
            Ok(PilotMessage::Command {
                command,
                request_code,
            }) if command == "query_information" => {
                match RequestCode::parse(&request_code) {
                    Some(code) => {
                        match tokio::time::timeout(COMMAND_TIMEOUT, answer_query(&state, code))
                            .await
                        {
                            Ok(response) => response,
                            Err(_) => {
                                tracing::warn!(request_code = %request_code, "Pilot query timed out");
                                PilotResponse::error(code.code())
                            }
                        }
                    }
                    None => {
                        tracing::warn!(request_code = %request_code, "Unknown pilot request code");
                        PilotResponse::error(&request_code)
                    }
                }
            }
            Ok(PilotMessage::Command { command, .. }) => {
                tracing::warn!(command = %command, "Unknown pilot command");
                PilotResponse::error("")
            }
            Err(e) => {
                tracing::warn!(error = %e, "Malformed pilot message dropped");
                PilotResponse::error("")
            }
        };
        state
            .hub
            .send_to(&session_id, response.encode().into_bytes())
            .await;
    }

    state.hub.unregister(&session_id).await;
}

async fn answer_query(state: &AppState, code: RequestCode) -> PilotResponse {
    let request_time = Utc::now();

    let response_code: String = match code {
        RequestCode::BirdRisk => state.bird_risk.read().await.code().to_string(),
        RequestCode::RunwayAStatus => runway_code(state.zones.runway_clear('A').await),
        RequestCode::RunwayBStatus => runway_code(state.zones.runway_clear('B').await),
        RequestCode::RunwayAvailability => {
            let a = state.zones.runway_clear('A').await;
            let b = state.zones.runway_clear('B').await;
            match (a, b) {
                (true, true) => "ALL",
                (true, false) => "A_ONLY",
                (false, true) => "B_ONLY",
                (false, false) => "NONE",
            }
            .to_string()
        }
    };

    let response_time = Utc::now();
    if let Err(e) = state
        .repository
        .add_interaction_log(
            code.request_id(),
            response_type_id(&response_code),
            request_time,
            response_time,
        )
        .await
    {
        tracing::error!(error = %e, "Interaction log append failed");
    }

    tracing::info!(
        request_code = %code.code(),
        response_code = %response_code,
        "Pilot query answered"
    );
    PilotResponse::success(code.code(), &response_code)
}

fn runway_code(clear: bool) -> String {
    if clear { "CLEAR" } else { "BLOCKED" }.to_string()
}
