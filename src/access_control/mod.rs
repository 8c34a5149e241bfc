//! AccessControl - Object Classification and Zone Authority
//!
//! ## Responsibilities
//!
//! - Classify detections: hazard / access subject / normal traffic
//! - Evaluate zone authority levels against access subjects
//! - Keep the in-memory authority cache, refreshed only by AC_UA commits
//!
//! Aircraft are never alerted. A fallen person is a rescue event and
//! outranks zone authority. An unresolved zone is treated as a violation.

use crate::models::{
    AuthorityLevel, EventType, LocatedDetection, ObjectClass, Pose, Violation,
};
use std::collections::HashMap;
use tokio::sync::RwLock;

pub const ZONE_COUNT: usize = 8;

/// Authority snapshot, one level per zone id
pub type AuthoritySnapshot = HashMap<u8, AuthorityLevel>;

/// Authority cache; single writer (AC_UA handler), read-mostly
pub struct AccessCache {
    levels: RwLock<AuthoritySnapshot>,
}

impl AccessCache {
    /// All zones default to AUTH_ONLY until loaded from the repository
    pub fn new() -> Self {
        let mut levels = HashMap::new();
        for area_id in 1..=ZONE_COUNT as u8 {
            levels.insert(area_id, AuthorityLevel::AuthOnly);
        }
        Self {
            levels: RwLock::new(levels),
        }
    }

    /// Replace the whole cache (startup load and AC_UA commit)
    pub async fn replace(&self, levels: [i32; ZONE_COUNT]) {
        let mut cache = self.levels.write().await;
        for (i, level_id) in levels.iter().enumerate() {
            let level = AuthorityLevel::from_id(*level_id).unwrap_or(AuthorityLevel::AuthOnly);
            cache.insert(i as u8 + 1, level);
        }
        tracing::info!(levels = ?levels, "Authority cache replaced");
    }

    /// Consistent snapshot for one pipeline tick
    pub async fn snapshot(&self) -> AuthoritySnapshot {
        self.levels.read().await.clone()
    }

    /// Current levels as the AH_AC wire vector
    pub async fn level_vector(&self) -> [i32; ZONE_COUNT] {
        let cache = self.levels.read().await;
        let mut out = [AuthorityLevel::AuthOnly.level_id(); ZONE_COUNT];
        for (i, slot) in out.iter_mut().enumerate() {
            if let Some(level) = cache.get(&(i as u8 + 1)) {
                *slot = level.level_id();
            }
        }
        out
    }
}

impl Default for AccessCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Evaluate one located detection against an authority snapshot.
/// Returns the violation to fan out, or None when the detection is dropped.
pub fn evaluate(located: LocatedDetection, authority: &AuthoritySnapshot) -> Option<Violation> {
    let class = located.detection.class;

    if class.is_aircraft() {
        return None;
    }

    // Rescue outranks zone authority
    if class == ObjectClass::Person && located.detection.pose == Some(Pose::Fallen) {
        return Some(Violation {
            located,
            event_type: EventType::Rescue,
            rescue_level: Some(1),
        });
    }

    if class.is_hazard() {
        return Some(Violation {
            located,
            event_type: EventType::Hazard,
            rescue_level: None,
        });
    }

    // Access subject: PERSON, VEHICLE, WORK_PERSON, WORK_VEHICLE
    let rescue_level = (class == ObjectClass::Person).then_some(0);

    let Some(area_id) = located.area_id else {
        // unknown zone is a violation
        return Some(Violation {
            located,
            event_type: EventType::Unauth,
            rescue_level,
        });
    };

    let level = authority
        .get(&area_id)
        .copied()
        .unwrap_or(AuthorityLevel::AuthOnly);

    match level {
        AuthorityLevel::Open => None,
        AuthorityLevel::AuthOnly if class.is_work_class() => None,
        AuthorityLevel::AuthOnly | AuthorityLevel::NoEntry => Some(Violation {
            located,
            event_type: EventType::Unauth,
            rescue_level,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BBox, Detection};

    fn located(class: ObjectClass, area_id: Option<u8>, pose: Option<Pose>) -> LocatedDetection {
        LocatedDetection {
            detection: Detection {
                object_id: 1,
                class,
                bbox: BBox { x1: 0.0, y1: 0.0, x2: 10.0, y2: 10.0 },
                confidence: 0.9,
                pose,
            },
            norm_x: 0.5,
            norm_y: 0.5,
            map_x: 480.0,
            map_y: 360.0,
            area_id,
        }
    }

    fn snapshot(levels: [i32; ZONE_COUNT]) -> AuthoritySnapshot {
        levels
            .iter()
            .enumerate()
            .map(|(i, &l)| (i as u8 + 1, AuthorityLevel::from_id(l).unwrap()))
            .collect()
    }

    #[test]
    fn aircraft_is_never_alerted() {
        let auth = snapshot([3; 8]);
        assert!(evaluate(located(ObjectClass::Airplane, Some(5), None), &auth).is_none());
        assert!(evaluate(located(ObjectClass::Aircraft, None, None), &auth).is_none());
    }

    #[test]
    fn hazard_classes_bypass_authority() {
        let auth = snapshot([1; 8]);
        for class in [ObjectClass::Bird, ObjectClass::Fod, ObjectClass::Animal] {
            let v = evaluate(located(class, Some(1), None), &auth).unwrap();
            assert_eq!(v.event_type, EventType::Hazard);
            assert!(v.rescue_level.is_none());
        }
    }

    #[test]
    fn open_zone_admits_everyone() {
        let auth = snapshot([1, 2, 3, 2, 2, 2, 2, 2]);
        assert!(evaluate(located(ObjectClass::Person, Some(1), Some(Pose::Stand)), &auth).is_none());
        assert!(evaluate(located(ObjectClass::Vehicle, Some(1), None), &auth).is_none());
    }

    #[test]
    fn auth_only_admits_work_classes_only() {
        let auth = snapshot([2; 8]);
        assert!(evaluate(located(ObjectClass::WorkPerson, Some(5), None), &auth).is_none());
        assert!(evaluate(located(ObjectClass::WorkVehicle, Some(5), None), &auth).is_none());

        let v = evaluate(located(ObjectClass::Person, Some(5), Some(Pose::Stand)), &auth).unwrap();
        assert_eq!(v.event_type, EventType::Unauth);
        assert_eq!(v.rescue_level, Some(0));

        let v = evaluate(located(ObjectClass::Vehicle, Some(5), None), &auth).unwrap();
        assert_eq!(v.event_type, EventType::Unauth);
        assert!(v.rescue_level.is_none());
    }

    #[test]
    fn no_entry_rejects_work_classes_too() {
        let auth = snapshot([1, 2, 3, 2, 2, 2, 2, 2]);
        let v = evaluate(located(ObjectClass::WorkVehicle, Some(3), None), &auth).unwrap();
        assert_eq!(v.event_type, EventType::Unauth);
    }

    #[test]
    fn unknown_zone_is_a_violation() {
        let auth = snapshot([1; 8]);
        let v = evaluate(located(ObjectClass::Person, None, Some(Pose::Stand)), &auth).unwrap();
        assert_eq!(v.event_type, EventType::Unauth);
        assert_eq!(v.rescue_level, Some(0));
    }

    #[test]
    fn fallen_person_is_rescue_regardless_of_authority() {
        // even in an OPEN zone, a fallen person is alerted
        let auth = snapshot([1; 8]);
        let v = evaluate(located(ObjectClass::Person, Some(1), Some(Pose::Fallen)), &auth).unwrap();
        assert_eq!(v.event_type, EventType::Rescue);
        assert_eq!(v.rescue_level, Some(1));
    }

    #[test]
    fn only_person_carries_rescue_level() {
        let auth = snapshot([3; 8]);
        let v = evaluate(located(ObjectClass::WorkPerson, Some(4), None), &auth).unwrap();
        assert!(v.rescue_level.is_none());
        let v = evaluate(located(ObjectClass::Person, Some(4), Some(Pose::Stand)), &auth).unwrap();
        assert_eq!(v.rescue_level, Some(0));
    }

    #[tokio::test]
    async fn cache_replace_and_vector() {
        let cache = AccessCache::new();
        assert_eq!(cache.level_vector().await, [2; 8]);
        cache.replace([1, 2, 3, 2, 2, 2, 2, 2]).await;
        assert_eq!(cache.level_vector().await, [1, 2, 3, 2, 2, 2, 2, 2]);
        let snapshot = cache.snapshot().await;
        assert_eq!(snapshot.get(&1), Some(&AuthorityLevel::Open));
        assert_eq!(snapshot.get(&3), Some(&AuthorityLevel::NoEntry));
    }
}
