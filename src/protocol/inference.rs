//! Inference worker channel messages (JSON lines)

use crate::models::{BBox, Detection, ObjectClass, Pose};
use serde::Deserialize;

/// Any message arriving on the inference channel
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InferenceMessage {
    Event(InferenceEvent),
    Response(CommandResponse),
}

/// Events pushed by the worker
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InferenceEvent {
    ObjectDetected {
        camera_id: String,
        img_id: i64,
        #[serde(default)]
        detections: Vec<WireDetection>,
    },
    /// Marker sightings are calibration-time only, ignored at steady state
    MarkerDetected {
        camera_id: String,
        #[serde(default)]
        markers: serde_json::Value,
    },
    MapCalibration {
        camera_id: String,
        matrix: [[f64; 3]; 3],
        scale: f64,
    },
}

/// Worker acknowledgement of a server command
#[derive(Debug, Clone, Deserialize)]
pub struct CommandResponse {
    pub command: String,
    pub result: String,
}

impl CommandResponse {
    pub fn is_ok(&self) -> bool {
        self.result == "ok"
    }
}

/// Detection entry as serialized by the worker
#[derive(Debug, Clone, Deserialize)]
pub struct WireDetection {
    pub object_id: i64,
    pub class: String,
    pub bbox: [f64; 4],
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub pose: Option<String>,
}

impl WireDetection {
    /// Resolve the class name; detections with unknown classes are dropped
    /// by the caller (with a warning counter).
    pub fn into_detection(self) -> Option<Detection> {
        let class = ObjectClass::parse(&self.class)?;
        let pose = self.pose.as_deref().and_then(|p| match p {
            "fallen" => Some(Pose::Fallen),
            "stand" => Some(Pose::Stand),
            _ => None,
        });
        Some(Detection {
            object_id: self.object_id,
            class,
            bbox: BBox {
                x1: self.bbox[0],
                y1: self.bbox[1],
                x2: self.bbox[2],
                y2: self.bbox[3],
            },
            confidence: self.confidence,
            pose,
        })
    }
}

/// The one command the server issues to the worker
pub fn set_mode_object_line() -> String {
    "{\"type\":\"command\",\"command\":\"set_mode_object\"}\n".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_object_detected() {
        let line = r#"{"type":"event","event":"object_detected","camera_id":"A","img_id":1718135772191843820,"detections":[{"object_id":1001,"class":"FOD","bbox":[400,300,440,340],"confidence":0.92}]}"#;
        let msg: InferenceMessage = serde_json::from_str(line).unwrap();
        match msg {
            InferenceMessage::Event(InferenceEvent::ObjectDetected {
                camera_id,
                img_id,
                detections,
            }) => {
                assert_eq!(camera_id, "A");
                assert_eq!(img_id, 1_718_135_772_191_843_820);
                assert_eq!(detections.len(), 1);
                let det = detections[0].clone().into_detection().unwrap();
                assert_eq!(det.class, ObjectClass::Fod);
                assert_eq!(det.bbox.centroid(), (420.0, 320.0));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn parses_map_calibration() {
        let line = r#"{"type":"event","event":"map_calibration","camera_id":"B","matrix":[[1.0,0.0,0.0],[0.0,1.0,0.0],[0.0,0.0,1.0]],"scale":2.5}"#;
        let msg: InferenceMessage = serde_json::from_str(line).unwrap();
        match msg {
            InferenceMessage::Event(InferenceEvent::MapCalibration {
                camera_id,
                matrix,
                scale,
            }) => {
                assert_eq!(camera_id, "B");
                assert_eq!(matrix[0][0], 1.0);
                assert_eq!(scale, 2.5);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn parses_set_mode_response() {
        let line = r#"{"type":"response","command":"set_mode_object","result":"ok"}"#;
        let msg: InferenceMessage = serde_json::from_str(line).unwrap();
        match msg {
            InferenceMessage::Response(resp) => {
                assert_eq!(resp.command, "set_mode_object");
                assert!(resp.is_ok());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn unknown_class_is_dropped() {
        let wire = WireDetection {
            object_id: 5,
            class: "drone".into(),
            bbox: [0.0, 0.0, 1.0, 1.0],
            confidence: 0.5,
            pose: None,
        };
        assert!(wire.into_detection().is_none());
    }

    #[test]
    fn fallen_pose_survives_parse() {
        let wire = WireDetection {
            object_id: 7,
            class: "person".into(),
            bbox: [0.0, 0.0, 10.0, 10.0],
            confidence: 0.9,
            pose: Some("fallen".into()),
        };
        let det = wire.into_detection().unwrap();
        assert_eq!(det.pose, Some(Pose::Fallen));
    }

    #[test]
    fn marker_detected_is_recognized() {
        let line = r#"{"type":"event","event":"marker_detected","camera_id":"A","markers":[{"id":3}]}"#;
        let msg: InferenceMessage = serde_json::from_str(line).unwrap();
        assert!(matches!(
            msg,
            InferenceMessage::Event(InferenceEvent::MarkerDetected { .. })
        ));
    }
}
