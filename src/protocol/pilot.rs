//! Pilot channel messages (JSON lines)

use crate::models::BirdRiskLevel;
use serde::{Deserialize, Serialize};

/// Inbound pilot message
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PilotMessage {
    Command {
        command: String,
        request_code: String,
    },
}

/// Recognized query codes (REQUEST_TYPE reference table)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestCode {
    BirdRisk,
    RunwayAStatus,
    RunwayBStatus,
    RunwayAvailability,
}

impl RequestCode {
    /// `RWY_AVAIL_INQ` is accepted as an alias for the canonical
    /// reference-table spelling `RWY_AVAIL_IN`.
    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "BR_INQ" => Some(Self::BirdRisk),
            "RWY_A_STATUS" => Some(Self::RunwayAStatus),
            "RWY_B_STATUS" => Some(Self::RunwayBStatus),
            "RWY_AVAIL_IN" | "RWY_AVAIL_INQ" => Some(Self::RunwayAvailability),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::BirdRisk => "BR_INQ",
            Self::RunwayAStatus => "RWY_A_STATUS",
            Self::RunwayBStatus => "RWY_B_STATUS",
            Self::RunwayAvailability => "RWY_AVAIL_IN",
        }
    }

    /// REQUEST_TYPE reference id for the interaction log
    pub fn request_id(&self) -> i32 {
        match self {
            Self::BirdRisk => 1,
            Self::RunwayAStatus => 2,
            Self::RunwayBStatus => 3,
            Self::RunwayAvailability => 4,
        }
    }
}

/// RESPONSE_TYPE reference id for the interaction log
pub fn response_type_id(code: &str) -> i32 {
    match code {
        "BR_HIGH" => 1,
        "BR_MEDIUM" => 2,
        "BR_LOW" => 3,
        "CLEAR" => 4,
        "BLOCKED" => 5,
        "ALL" => 6,
        "A_ONLY" => 7,
        "B_ONLY" => 8,
        "NONE" => 9,
        _ => 9,
    }
}

/// Outbound pilot response
#[derive(Debug, Clone, Serialize)]
pub struct PilotResponse {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub status: &'static str,
    pub request_code: String,
    pub response_code: String,
}

impl PilotResponse {
    pub fn success(request_code: &str, response_code: &str) -> Self {
        Self {
            kind: "response",
            status: "success",
            request_code: request_code.to_string(),
            response_code: response_code.to_string(),
        }
    }

    pub fn error(request_code: &str) -> Self {
        Self {
            kind: "response",
            status: "error",
            request_code: request_code.to_string(),
            response_code: String::new(),
        }
    }

    pub fn encode(&self) -> String {
        // struct serialization of plain strings cannot fail
        let mut line = serde_json::to_string(self).unwrap_or_default();
        line.push('\n');
        line
    }
}

/// Pushed runway transition notification
pub fn runway_status_changed_event(runway: char, blocked: bool) -> String {
    let status = if blocked { "BLOCKED" } else { "CLEAR" };
    format!(
        "{}\n",
        serde_json::json!({
            "type": "event",
            "event": format!("RWY_{runway}_STATUS_CHANGED"),
            "result": status,
        })
    )
}

/// Pushed bird-risk change notification
pub fn bird_risk_changed_event(level: BirdRiskLevel) -> String {
    format!(
        "{}\n",
        serde_json::json!({
            "type": "event",
            "event": "BR_CHANGED",
            "result": level.code(),
        })
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_query_command() {
        let line = r#"{"type":"command","command":"query_information","request_code":"BR_INQ"}"#;
        let msg: PilotMessage = serde_json::from_str(line).unwrap();
        let PilotMessage::Command { command, request_code } = msg;
        assert_eq!(command, "query_information");
        assert_eq!(RequestCode::parse(&request_code), Some(RequestCode::BirdRisk));
    }

    #[test]
    fn availability_alias_is_accepted() {
        assert_eq!(
            RequestCode::parse("RWY_AVAIL_INQ"),
            Some(RequestCode::RunwayAvailability)
        );
        assert_eq!(
            RequestCode::parse("RWY_AVAIL_IN").unwrap().code(),
            "RWY_AVAIL_IN"
        );
        assert!(RequestCode::parse("RWY_C_STATUS").is_none());
    }

    #[test]
    fn response_shape() {
        let resp = PilotResponse::success("BR_INQ", "BR_MEDIUM");
        let line = resp.encode();
        let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value["type"], "response");
        assert_eq!(value["status"], "success");
        assert_eq!(value["request_code"], "BR_INQ");
        assert_eq!(value["response_code"], "BR_MEDIUM");
    }

    #[test]
    fn interaction_log_ids() {
        assert_eq!(RequestCode::BirdRisk.request_id(), 1);
        assert_eq!(RequestCode::RunwayAvailability.request_id(), 4);
        assert_eq!(response_type_id("CLEAR"), 4);
        assert_eq!(response_type_id("NONE"), 9);
    }

    #[test]
    fn pushed_events_shape() {
        let line = runway_status_changed_event('A', true);
        let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value["event"], "RWY_A_STATUS_CHANGED");
        assert_eq!(value["result"], "BLOCKED");

        let line = bird_risk_changed_event(BirdRiskLevel::Low);
        let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value["event"], "BR_CHANGED");
        assert_eq!(value["result"], "BR_LOW");
    }
}
