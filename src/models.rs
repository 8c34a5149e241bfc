//! Domain types shared across the pipeline
//!
//! Enum ids mirror the reference tables (OBJECT_TYPE, EVENT_TYPE,
//! AUTHORITY_LEVEL, BIRD_RISK_LEVEL) so wire and persistence agree.

use serde::{Deserialize, Serialize};

/// Object classes reported by the inference worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectClass {
    Bird,
    Fod,
    Animal,
    Person,
    Vehicle,
    WorkPerson,
    WorkVehicle,
    Airplane,
    Aircraft,
}

impl ObjectClass {
    /// Case-insensitive parse of the class name as sent on the wire
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BIRD" => Some(Self::Bird),
            "FOD" => Some(Self::Fod),
            "ANIMAL" => Some(Self::Animal),
            "PERSON" => Some(Self::Person),
            "VEHICLE" => Some(Self::Vehicle),
            "WORK_PERSON" => Some(Self::WorkPerson),
            "WORK_VEHICLE" => Some(Self::WorkVehicle),
            "AIRPLANE" => Some(Self::Airplane),
            "AIRCRAFT" => Some(Self::Aircraft),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Bird => "BIRD",
            Self::Fod => "FOD",
            Self::Animal => "ANIMAL",
            Self::Person => "PERSON",
            Self::Vehicle => "VEHICLE",
            Self::WorkPerson => "WORK_PERSON",
            Self::WorkVehicle => "WORK_VEHICLE",
            Self::Airplane => "AIRPLANE",
            Self::Aircraft => "AIRCRAFT",
        }
    }

    /// OBJECT_TYPE reference id
    pub fn type_id(&self) -> i32 {
        match self {
            Self::Bird => 0,
            Self::Fod => 1,
            Self::Person => 2,
            Self::Animal => 3,
            Self::Airplane => 4,
            Self::Vehicle => 5,
            Self::WorkPerson => 6,
            Self::WorkVehicle => 7,
            Self::Aircraft => 8,
        }
    }

    /// Normal-operations traffic that is never alerted on
    pub fn is_aircraft(&self) -> bool {
        matches!(self, Self::Airplane | Self::Aircraft)
    }

    /// Hazardous foreign presence, alerted regardless of zone authority
    pub fn is_hazard(&self) -> bool {
        matches!(self, Self::Bird | Self::Fod | Self::Animal)
    }

    /// Work-authorized classes admitted into AUTH_ONLY zones
    pub fn is_work_class(&self) -> bool {
        matches!(self, Self::WorkPerson | Self::WorkVehicle)
    }
}

/// Pose reported for person detections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pose {
    Stand,
    Fallen,
}

/// Event classification attached before fan-out (EVENT_TYPE reference table)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Hazard,
    Unauth,
    Rescue,
}

impl EventType {
    pub fn type_id(&self) -> i32 {
        match self {
            Self::Hazard => 1,
            Self::Unauth => 2,
            Self::Rescue => 3,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Hazard => "HAZARD",
            Self::Unauth => "UNAUTH",
            Self::Rescue => "RESCUE",
        }
    }
}

/// Zone authority level (AUTHORITY_LEVEL reference table)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorityLevel {
    Open,
    AuthOnly,
    NoEntry,
}

impl AuthorityLevel {
    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            1 => Some(Self::Open),
            2 => Some(Self::AuthOnly),
            3 => Some(Self::NoEntry),
            _ => None,
        }
    }

    pub fn level_id(&self) -> i32 {
        match self {
            Self::Open => 1,
            Self::AuthOnly => 2,
            Self::NoEntry => 3,
        }
    }
}

/// Bird risk level published by the external estimator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BirdRiskLevel {
    High,
    Medium,
    Low,
}

impl BirdRiskLevel {
    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "BR_HIGH" => Some(Self::High),
            "BR_MEDIUM" => Some(Self::Medium),
            "BR_LOW" => Some(Self::Low),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::High => "BR_HIGH",
            Self::Medium => "BR_MEDIUM",
            Self::Low => "BR_LOW",
        }
    }

    /// BIRD_RISK_LEVEL reference id, also the ME_BR wire value
    pub fn level_id(&self) -> i32 {
        match self {
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }

    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            1 => Some(Self::High),
            2 => Some(Self::Medium),
            3 => Some(Self::Low),
            _ => None,
        }
    }
}

/// Pixel-space bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BBox {
    pub fn centroid(&self) -> (f64, f64) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }
}

/// One of the 8 fixed airfield zones, rectangle in normalized coordinates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Area {
    pub area_id: u8,
    pub area_name: String,
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl Area {
    pub fn contains(&self, nx: f64, ny: f64) -> bool {
        self.x1 <= nx && nx <= self.x2 && self.y1 <= ny && ny <= self.y2
    }
}

/// A detection as received from the inference worker, class already parsed
#[derive(Debug, Clone)]
pub struct Detection {
    pub object_id: i64,
    pub class: ObjectClass,
    pub bbox: BBox,
    pub confidence: f32,
    pub pose: Option<Pose>,
}

/// Detection after coordinate transformation
#[derive(Debug, Clone)]
pub struct LocatedDetection {
    pub detection: Detection,
    pub norm_x: f64,
    pub norm_y: f64,
    pub map_x: f64,
    pub map_y: f64,
    pub area_id: Option<u8>,
}

impl LocatedDetection {
    /// Map coordinates truncated for wire messages
    pub fn map_point(&self) -> (i32, i32) {
        (self.map_x as i32, self.map_y as i32)
    }
}

/// Detection that passed access control and will be fanned out
#[derive(Debug, Clone)]
pub struct Violation {
    pub located: LocatedDetection,
    pub event_type: EventType,
    pub rescue_level: Option<u8>,
}

impl Violation {
    pub fn object_id(&self) -> i64 {
        self.located.detection.object_id
    }

    pub fn class(&self) -> ObjectClass {
        self.located.detection.class
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_parse_is_case_insensitive() {
        assert_eq!(ObjectClass::parse("person"), Some(ObjectClass::Person));
        assert_eq!(ObjectClass::parse("WORK_VEHICLE"), Some(ObjectClass::WorkVehicle));
        assert_eq!(ObjectClass::parse("Fod"), Some(ObjectClass::Fod));
        assert_eq!(ObjectClass::parse("drone"), None);
    }

    #[test]
    fn class_groups() {
        assert!(ObjectClass::Airplane.is_aircraft());
        assert!(ObjectClass::Aircraft.is_aircraft());
        assert!(ObjectClass::Bird.is_hazard());
        assert!(!ObjectClass::Person.is_hazard());
        assert!(ObjectClass::WorkPerson.is_work_class());
        assert!(!ObjectClass::Vehicle.is_work_class());
    }

    #[test]
    fn authority_round_trip() {
        for id in 1..=3 {
            let level = AuthorityLevel::from_id(id).unwrap();
            assert_eq!(level.level_id(), id);
        }
        assert!(AuthorityLevel::from_id(0).is_none());
        assert!(AuthorityLevel::from_id(4).is_none());
    }

    #[test]
    fn bird_risk_codes() {
        assert_eq!(BirdRiskLevel::parse("BR_MEDIUM"), Some(BirdRiskLevel::Medium));
        assert_eq!(BirdRiskLevel::Medium.level_id(), 2);
        assert_eq!(BirdRiskLevel::High.code(), "BR_HIGH");
        assert!(BirdRiskLevel::parse("BR_NONE").is_none());
    }

    #[test]
    fn bbox_centroid() {
        let b = BBox { x1: 400.0, y1: 300.0, x2: 440.0, y2: 340.0 };
        assert_eq!(b.centroid(), (420.0, 320.0));
    }

    #[test]
    fn area_contains_is_inclusive() {
        let area = Area {
            area_id: 1,
            area_name: "TWY_A".into(),
            x1: 0.0,
            y1: 0.23,
            x2: 0.19,
            y2: 0.52,
        };
        assert!(area.contains(0.0, 0.23));
        assert!(area.contains(0.19, 0.52));
        assert!(area.contains(0.1, 0.4));
        assert!(!area.contains(0.2, 0.4));
    }
}
