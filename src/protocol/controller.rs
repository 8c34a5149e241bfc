//! Controller channel line grammar
//!
//! Commands arrive as newline-terminated ASCII (`MC_XX[:data]`, `AC_XX[:data]`,
//! `LC_XX:data`). Responses are text lines, except the image-carrying forms
//! (MR_OD, LR_OI, ME_FD) where raw JPEG bytes follow the textual header.

use crate::models::BirdRiskLevel;

/// Parsed controller command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerCommand {
    /// MC_CA - subscribe camera A video, unsubscribe B
    SubscribeCameraA,
    /// MC_CB - subscribe camera B video, unsubscribe A
    SubscribeCameraB,
    /// MC_MP - map view, stop video relay
    MapView,
    /// MC_OD:<id> - object detail fetch
    ObjectDetail(i64),
    /// AC_AC - read zone authority levels
    ReadAccess,
    /// AC_UA:l1,...,l8 - write zone authority levels
    UpdateAccess([i32; 8]),
    /// LC_OL:from,to - detection event history
    HistoryEvents { from: String, to: String },
    /// LC_OI:<id> - stored first-detection image
    HistoryImage(i64),
    /// LC_BL:from,to - bird risk level history
    HistoryBirdRisk { from: String, to: String },
    /// LC_RL:from,to - pilot interaction history
    HistoryInteractions { from: String, to: String },
}

/// Parse failure carrying the ready-to-send error reply for the offending
/// command family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFailure {
    pub reply: &'static str,
}

fn fail(reply: &'static str) -> std::result::Result<ControllerCommand, ParseFailure> {
    Err(ParseFailure { reply })
}

fn date_range(data: &str) -> Option<(String, String)> {
    let mut parts = data.splitn(2, ',');
    let from = parts.next()?.trim();
    let to = parts.next()?.trim();
    if from.is_empty() || to.is_empty() {
        return None;
    }
    Some((from.to_string(), to.to_string()))
}

/// Parse one controller command line (without the trailing newline)
pub fn parse_command(line: &str) -> std::result::Result<ControllerCommand, ParseFailure> {
    let line = line.trim();
    let (cmd, data) = match line.split_once(':') {
        Some((c, d)) => (c, d),
        None => (line, ""),
    };

    match cmd {
        "MC_CA" => Ok(ControllerCommand::SubscribeCameraA),
        "MC_CB" => Ok(ControllerCommand::SubscribeCameraB),
        "MC_MP" => Ok(ControllerCommand::MapView),
        "MC_OD" => match data.trim().parse::<i64>() {
            Ok(id) => Ok(ControllerCommand::ObjectDetail(id)),
            Err(_) => fail("MR_OD:ERR,1\n"),
        },
        "AC_AC" => Ok(ControllerCommand::ReadAccess),
        "AC_UA" => {
            let fields: Vec<&str> = data.split(',').collect();
            if fields.len() != 8 {
                return fail("AH_UA:ERROR\n");
            }
            let mut levels = [0i32; 8];
            for (i, field) in fields.iter().enumerate() {
                match field.trim().parse::<i32>() {
                    Ok(v @ 1..=3) => levels[i] = v,
                    _ => return fail("AH_UA:ERROR\n"),
                }
            }
            Ok(ControllerCommand::UpdateAccess(levels))
        }
        "LC_OL" => match date_range(data) {
            Some((from, to)) => Ok(ControllerCommand::HistoryEvents { from, to }),
            None => fail("LR_OL:ERR,1\n"),
        },
        "LC_OI" => match data.trim().parse::<i64>() {
            Ok(id) => Ok(ControllerCommand::HistoryImage(id)),
            Err(_) => fail("LR_OI:ERR,1\n"),
        },
        "LC_BL" => match date_range(data) {
            Some((from, to)) => Ok(ControllerCommand::HistoryBirdRisk { from, to }),
            None => fail("LR_BL:ERR,1\n"),
        },
        "LC_RL" => match date_range(data) {
            Some((from, to)) => Ok(ControllerCommand::HistoryInteractions { from, to }),
            None => fail("LR_RL:ERR,1\n"),
        },
        _ if cmd.starts_with("AC_") => fail("AH_UA:ERROR\n"),
        _ if cmd.starts_with("LC_") => fail("LR_ERROR:Unknown log command\n"),
        _ if cmd.starts_with("MC_") => fail("MR_ERROR:Unknown command type\n"),
        _ => fail("MR_ERROR:Invalid command format\n"),
    }
}

// ---------------------------------------------------------------------------
// Outbound encoding
// ---------------------------------------------------------------------------

/// One ME_OD entry, fields already resolved by the pipeline
#[derive(Debug, Clone)]
pub struct OdEntry {
    pub object_id: i64,
    pub class_name: &'static str,
    pub map_x: i32,
    pub map_y: i32,
    pub area_name: String,
    /// Present only for PERSON
    pub rescue_level: Option<u8>,
}

/// `ME_OD:` + semicolon-joined entries + newline
pub fn encode_me_od(entries: &[OdEntry]) -> String {
    let joined = entries
        .iter()
        .map(|e| {
            let mut s = format!(
                "{},{},{},{},{}",
                e.object_id, e.class_name, e.map_x, e.map_y, e.area_name
            );
            if let Some(level) = e.rescue_level {
                s.push(',');
                s.push_str(&level.to_string());
            }
            s
        })
        .collect::<Vec<_>>()
        .join(";");
    format!("ME_OD:{joined}\n")
}

/// First-detection message, header + raw image bytes
#[derive(Debug, Clone)]
pub struct FdMessage {
    pub event_type_id: i32,
    pub object_id: i64,
    pub class_name: &'static str,
    pub map_x: i32,
    pub map_y: i32,
    pub area_name: String,
    /// ISO8601 UTC
    pub timestamp: String,
    /// Present only for PERSON
    pub rescue_level: Option<u8>,
    pub image: Vec<u8>,
}

impl FdMessage {
    /// `ME_FD:` + header + `,` + image bytes + newline
    pub fn encode(&self) -> Vec<u8> {
        let header = match self.rescue_level {
            Some(level) => format!(
                "ME_FD:{},{},{},{},{},{},{},{},{}",
                self.event_type_id,
                self.object_id,
                self.class_name,
                self.map_x,
                self.map_y,
                self.area_name,
                self.timestamp,
                level,
                self.image.len()
            ),
            None => format!(
                "ME_FD:{},{},{},{},{},{},{},{}",
                self.event_type_id,
                self.object_id,
                self.class_name,
                self.map_x,
                self.map_y,
                self.area_name,
                self.timestamp,
                self.image.len()
            ),
        };
        let mut out = Vec::with_capacity(header.len() + 1 + self.image.len() + 1);
        out.extend_from_slice(header.as_bytes());
        out.push(b',');
        out.extend_from_slice(&self.image);
        out.push(b'\n');
        out
    }
}

/// ME_RA / ME_RB zone status (1 = HAZARD, 0 = NORMAL)
pub fn encode_runway_status(runway: char, hazard: bool) -> String {
    format!("ME_R{}:{}\n", runway, if hazard { 1 } else { 0 })
}

/// ME_BR bird risk broadcast
pub fn encode_bird_risk(level: BirdRiskLevel) -> String {
    format!("ME_BR:{}\n", level.level_id())
}

/// ME_MC map-calibrated notification
pub fn encode_map_calibrated() -> String {
    "ME_MC\n".to_string()
}

/// AH_AC read-access response
pub fn encode_access_levels(levels: &[i32; 8]) -> String {
    let joined = levels
        .iter()
        .map(|l| l.to_string())
        .collect::<Vec<_>>()
        .join(",");
    format!("AH_AC:{joined}\n")
}

/// MR_OD success: header + `$$` + image bytes
pub fn encode_object_detail(
    object_id: i64,
    class_name: &str,
    area_name: &str,
    timestamp: &str,
    image: &[u8],
) -> Vec<u8> {
    let header = format!(
        "MR_OD:OK,{},{},{},{},{}$$",
        object_id,
        class_name,
        area_name,
        timestamp,
        image.len()
    );
    let mut out = Vec::with_capacity(header.len() + image.len() + 1);
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(image);
    out.push(b'\n');
    out
}

/// LR_OI success: `LR_OI:OK,<size>,` + image bytes
pub fn encode_history_image(image: &[u8]) -> Vec<u8> {
    let header = format!("LR_OI:OK,{},", image.len());
    let mut out = Vec::with_capacity(header.len() + image.len() + 1);
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(image);
    out.push(b'\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subscription_commands() {
        assert_eq!(parse_command("MC_CA"), Ok(ControllerCommand::SubscribeCameraA));
        assert_eq!(parse_command("MC_CB"), Ok(ControllerCommand::SubscribeCameraB));
        assert_eq!(parse_command("MC_MP"), Ok(ControllerCommand::MapView));
    }

    #[test]
    fn parses_object_detail() {
        assert_eq!(
            parse_command("MC_OD:2223"),
            Ok(ControllerCommand::ObjectDetail(2223))
        );
        assert_eq!(
            parse_command("MC_OD:abc").unwrap_err().reply,
            "MR_OD:ERR,1\n"
        );
    }

    #[test]
    fn parses_access_update() {
        assert_eq!(
            parse_command("AC_UA:1,2,3,2,2,2,2,2"),
            Ok(ControllerCommand::UpdateAccess([1, 2, 3, 2, 2, 2, 2, 2]))
        );
    }

    #[test]
    fn access_update_rejects_bad_arity_and_range() {
        assert_eq!(
            parse_command("AC_UA:1,2,3").unwrap_err().reply,
            "AH_UA:ERROR\n"
        );
        assert_eq!(
            parse_command("AC_UA:1,2,3,2,2,2,2,4").unwrap_err().reply,
            "AH_UA:ERROR\n"
        );
        assert_eq!(
            parse_command("AC_UA:0,2,3,2,2,2,2,2").unwrap_err().reply,
            "AH_UA:ERROR\n"
        );
        assert_eq!(
            parse_command("AC_UA:1,2,3,2,2,2,2,2,2").unwrap_err().reply,
            "AH_UA:ERROR\n"
        );
    }

    #[test]
    fn parses_history_commands() {
        assert_eq!(
            parse_command("LC_OL:2025-01-01,2025-01-31"),
            Ok(ControllerCommand::HistoryEvents {
                from: "2025-01-01".into(),
                to: "2025-01-31".into()
            })
        );
        assert_eq!(
            parse_command("LC_OL:2025-01-01").unwrap_err().reply,
            "LR_OL:ERR,1\n"
        );
        assert_eq!(
            parse_command("LC_OI:1001"),
            Ok(ControllerCommand::HistoryImage(1001))
        );
    }

    #[test]
    fn unknown_commands_map_to_family_errors() {
        assert_eq!(
            parse_command("MC_XX").unwrap_err().reply,
            "MR_ERROR:Unknown command type\n"
        );
        assert_eq!(
            parse_command("AC_XY").unwrap_err().reply,
            "AH_UA:ERROR\n"
        );
        assert_eq!(
            parse_command("LC_XY:a,b").unwrap_err().reply,
            "LR_ERROR:Unknown log command\n"
        );
        assert_eq!(
            parse_command("PING").unwrap_err().reply,
            "MR_ERROR:Invalid command format\n"
        );
    }

    #[test]
    fn me_od_formats_person_with_rescue_level() {
        let entries = vec![
            OdEntry {
                object_id: 1001,
                class_name: "FOD",
                map_x: 422,
                map_y: 345,
                area_name: "TWY_A".into(),
                rescue_level: None,
            },
            OdEntry {
                object_id: 1002,
                class_name: "PERSON",
                map_x: 100,
                map_y: 200,
                area_name: "RWY_A".into(),
                rescue_level: Some(1),
            },
        ];
        assert_eq!(
            encode_me_od(&entries),
            "ME_OD:1001,FOD,422,345,TWY_A;1002,PERSON,100,200,RWY_A,1\n"
        );
    }

    #[test]
    fn me_fd_header_layout() {
        let msg = FdMessage {
            event_type_id: 1,
            object_id: 1001,
            class_name: "FOD",
            map_x: 422,
            map_y: 345,
            area_name: "TWY_A".into(),
            timestamp: "2025-06-11T12:00:00Z".into(),
            rescue_level: None,
            image: vec![0xFF, 0xD8, 0xFF],
        };
        let encoded = msg.encode();
        let header_end = encoded.iter().position(|&b| b == b',').unwrap();
        // image size field counts the raw bytes that follow
        assert!(encoded.starts_with(b"ME_FD:1,1001,FOD,422,345,TWY_A,2025-06-11T12:00:00Z,3"));
        assert_eq!(&encoded[encoded.len() - 4..], &[0xFF, 0xD8, 0xFF, b'\n']);
        assert!(header_end > 0);
    }

    #[test]
    fn me_fd_person_includes_rescue_level_before_size() {
        let msg = FdMessage {
            event_type_id: 3,
            object_id: 7,
            class_name: "PERSON",
            map_x: 10,
            map_y: 20,
            area_name: "RWY_B".into(),
            timestamp: "2025-06-11T12:00:00Z".into(),
            rescue_level: Some(1),
            image: vec![1, 2],
        };
        assert!(msg
            .encode()
            .starts_with(b"ME_FD:3,7,PERSON,10,20,RWY_B,2025-06-11T12:00:00Z,1,2,"));
    }

    #[test]
    fn status_lines() {
        assert_eq!(encode_runway_status('A', true), "ME_RA:1\n");
        assert_eq!(encode_runway_status('B', false), "ME_RB:0\n");
        assert_eq!(encode_bird_risk(BirdRiskLevel::High), "ME_BR:1\n");
        assert_eq!(encode_map_calibrated(), "ME_MC\n");
        assert_eq!(
            encode_access_levels(&[1, 2, 3, 2, 2, 2, 2, 2]),
            "AH_AC:1,2,3,2,2,2,2,2\n"
        );
    }

    #[test]
    fn object_detail_uses_dollar_separator() {
        let out = encode_object_detail(9, "FOD", "TWY_A", "2025-06-11T12:00:00Z", &[7, 8, 9]);
        assert!(out.starts_with(b"MR_OD:OK,9,FOD,TWY_A,2025-06-11T12:00:00Z,3$$"));
        assert_eq!(&out[out.len() - 4..], &[7, 8, 9, b'\n']);
    }
}
