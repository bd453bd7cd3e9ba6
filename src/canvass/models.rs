use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::TrackerError;

/// Current state of one physical door.
///
/// Ranks order the states for the downgrade guard: a door never moves to a
/// lower-ranked state. `Lead` and `Rejection` share a rank — either can
/// supersede the other (lateral swap), but neither can fall back to
/// `Opened` or `NotOpened`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoorEvent {
    NotOpened,
    Opened,
    Lead,
    Rejection,
}

impl DoorEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotOpened => "not_opened",
            Self::Opened => "opened",
            Self::Lead => "lead",
            Self::Rejection => "rejection",
        }
    }

    pub fn rank(&self) -> u8 {
        match self {
            Self::NotOpened => 0,
            Self::Opened => 1,
            Self::Lead | Self::Rejection => 2,
        }
    }
}

impl std::fmt::Display for DoorEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DoorEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_opened" => Ok(Self::NotOpened),
            "opened" => Ok(Self::Opened),
            "lead" => Ok(Self::Lead),
            "rejection" => Ok(Self::Rejection),
            _ => Err(format!("Invalid door event: {}", s)),
        }
    }
}

/// Target states a caller may request. `not_opened` is only ever the
/// implicit initial state, never a transition target, so it is
/// unrepresentable here and such requests fail at deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextEvent {
    Opened,
    Lead,
    Rejection,
}

impl NextEvent {
    pub fn as_event(&self) -> DoorEvent {
        match self {
            Self::Opened => DoorEvent::Opened,
            Self::Lead => DoorEvent::Lead,
            Self::Rejection => DoorEvent::Rejection,
        }
    }

    pub fn rank(&self) -> u8 {
        self.as_event().rank()
    }
}

impl std::fmt::Display for NextEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_event().as_str())
    }
}

/// Composite identifier of one physical door within one location:
/// building section (Stiege), floor (Stockwerk), door label (Tür).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoorKey {
    pub location_id: i64,
    pub stiege: String,
    pub stockwerk: String,
    pub tuere: String,
}

impl DoorKey {
    /// Build a key from caller-supplied fields, trimming whitespace.
    /// Empty fields after trimming are a validation error.
    pub fn new(
        location_id: i64,
        stiege: &str,
        stockwerk: &str,
        tuere: &str,
    ) -> Result<Self, TrackerError> {
        if location_id <= 0 {
            return Err(TrackerError::Validation(
                "location_id must be positive".into(),
            ));
        }
        let stiege = stiege.trim();
        let stockwerk = stockwerk.trim();
        let tuere = tuere.trim();
        if stiege.is_empty() || stockwerk.is_empty() || tuere.is_empty() {
            return Err(TrackerError::Validation(
                "stiege, stockwerk and tuere must be non-empty".into(),
            ));
        }
        Ok(Self {
            location_id,
            stiege: stiege.to_string(),
            stockwerk: stockwerk.to_string(),
            tuere: tuere.to_string(),
        })
    }
}

/// One location with its rollup counters. `door_count` counts knock
/// attempts, not unique doors; the other three are derived from door
/// status transitions and clamped at zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub id: i64,
    pub uuid: String,
    pub address: String,
    pub door_count: i64,
    pub doors_opened: i64,
    pub leads: i64,
    pub rejections: i64,
    pub created_at: String,
}

/// A converted lead. Append-only, at most one per DoorKey.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadRecord {
    pub id: i64,
    pub lead_uuid: String,
    pub location_id: i64,
    pub stiege: String,
    pub stockwerk: String,
    pub tuere: String,
    pub first_name: String,
    pub last_name: Option<String>,
    pub created_at: String,
}

// API view types

/// Door status row joined with its location address, for the monitoring
/// view (most recently updated first).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoorEventView {
    pub id: i64,
    pub location_id: i64,
    pub address: String,
    pub stiege: String,
    pub stockwerk: String,
    pub tuere: String,
    pub event: DoorEvent,
    pub created_at: String,
    pub updated_at: String,
}

/// Lead row joined with its location address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadView {
    pub id: i64,
    pub lead_uuid: String,
    pub location_id: i64,
    pub address: String,
    pub first_name: String,
    pub last_name: Option<String>,
    pub stiege: String,
    pub stockwerk: String,
    pub tuere: String,
    pub created_at: String,
}

/// Counter columns an operator may adjust directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterField {
    DoorCount,
    DoorsOpened,
    Leads,
    Rejections,
}

impl CounterField {
    /// Column name in the `locations` table. Fixed set — never derived
    /// from user input.
    pub fn column(&self) -> &'static str {
        match self {
            Self::DoorCount => "door_count",
            Self::DoorsOpened => "doors_opened",
            Self::Leads => "leads",
            Self::Rejections => "rejections",
        }
    }
}

impl FromStr for CounterField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "door_count" => Ok(Self::DoorCount),
            "doors_opened" => Ok(Self::DoorsOpened),
            "leads" => Ok(Self::Leads),
            "rejections" => Ok(Self::Rejections),
            _ => Err(format!("Invalid counter field: {}", s)),
        }
    }
}

/// One manual counter adjustment. Delta defaults to +1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterOp {
    pub field: CounterField,
    #[serde(default = "default_delta")]
    pub delta: i64,
}

fn default_delta() -> i64 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_door_event_roundtrip() {
        for s in &["not_opened", "opened", "lead", "rejection"] {
            let parsed: DoorEvent = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("invalid".parse::<DoorEvent>().is_err());
    }

    #[test]
    fn test_counter_field_roundtrip() {
        for s in &["door_count", "doors_opened", "leads", "rejections"] {
            let parsed: CounterField = s.parse().unwrap();
            assert_eq!(parsed.column(), *s);
        }
        assert!("invalid".parse::<CounterField>().is_err());
    }

    #[test]
    fn test_serde_produces_lowercase_strings() {
        assert_eq!(
            serde_json::to_string(&DoorEvent::NotOpened).unwrap(),
            "\"not_opened\""
        );
        assert_eq!(
            serde_json::to_string(&NextEvent::Rejection).unwrap(),
            "\"rejection\""
        );
        assert_eq!(
            serde_json::to_string(&CounterField::DoorsOpened).unwrap(),
            "\"doors_opened\""
        );
    }

    #[test]
    fn test_serde_deserialize_lowercase_strings() {
        assert_eq!(
            serde_json::from_str::<DoorEvent>("\"lead\"").unwrap(),
            DoorEvent::Lead
        );
        assert_eq!(
            serde_json::from_str::<NextEvent>("\"opened\"").unwrap(),
            NextEvent::Opened
        );
    }

    #[test]
    fn test_next_event_rejects_not_opened() {
        // not_opened is not a valid transition target
        assert!(serde_json::from_str::<NextEvent>("\"not_opened\"").is_err());
    }

    #[test]
    fn test_ranks_are_monotone_with_lateral_tie() {
        assert!(DoorEvent::NotOpened.rank() < DoorEvent::Opened.rank());
        assert!(DoorEvent::Opened.rank() < DoorEvent::Lead.rank());
        assert_eq!(DoorEvent::Lead.rank(), DoorEvent::Rejection.rank());
    }

    #[test]
    fn test_door_key_trims_fields() {
        let key = DoorKey::new(1, " A ", " 2", "5 ").unwrap();
        assert_eq!(key.stiege, "A");
        assert_eq!(key.stockwerk, "2");
        assert_eq!(key.tuere, "5");
    }

    #[test]
    fn test_door_key_rejects_blank_fields() {
        assert!(matches!(
            DoorKey::new(1, "  ", "2", "5"),
            Err(TrackerError::Validation(_))
        ));
        assert!(matches!(
            DoorKey::new(0, "A", "2", "5"),
            Err(TrackerError::Validation(_))
        ));
    }

    #[test]
    fn test_counter_op_delta_defaults_to_one() {
        let op: CounterOp = serde_json::from_str("{\"field\":\"leads\"}").unwrap();
        assert_eq!(op.delta, 1);
        let op: CounterOp =
            serde_json::from_str("{\"field\":\"leads\",\"delta\":-2}").unwrap();
        assert_eq!(op.delta, -2);
    }
}
