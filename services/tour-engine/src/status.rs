//! Per-actor status record.
//!
//! A `Status` is owned by the actor it describes. Other actors only ever see
//! a copy, delivered inside a `StatusReport` message.
//!
//! `last_update` never goes backwards and moves forward on every mutation
//! that actually changes a field; a write of an identical value leaves it
//! untouched.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use galerie_id::GroupId;
use serde::{Deserialize, Serialize};

/// Typed status properties, plus a small extension map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_group: Option<GroupId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_exhibit: Option<String>,
    pub tours_completed: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    location: String,
    active: bool,
    available: bool,
    last_update: DateTime<Utc>,
    properties: StatusProperties,
}

impl Status {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            active: true,
            available: true,
            last_update: Utc::now(),
            properties: StatusProperties::default(),
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn last_update(&self) -> DateTime<Utc> {
        self.last_update
    }

    pub fn properties(&self) -> &StatusProperties {
        &self.properties
    }

    pub fn set_location(&mut self, location: impl Into<String>) {
        let location = location.into();
        if self.location != location {
            self.location = location;
            self.touch();
        }
    }

    pub fn set_active(&mut self, active: bool) {
        if self.active != active {
            self.active = active;
            self.touch();
        }
    }

    pub fn set_available(&mut self, available: bool) {
        if self.available != available {
            self.available = available;
            self.touch();
        }
    }

    /// Apply `f` to the properties; bumps `last_update` only if something
    /// changed.
    pub fn update_properties(&mut self, f: impl FnOnce(&mut StatusProperties)) {
        let mut next = self.properties.clone();
        f(&mut next);
        if next != self.properties {
            self.properties = next;
            self.touch();
        }
    }

    /// Owned copy for reporting to other actors.
    pub fn snapshot(&self) -> Status {
        self.clone()
    }

    fn touch(&mut self) {
        let now = Utc::now();
        self.last_update = if now > self.last_update {
            now
        } else {
            self.last_update + Duration::nanoseconds(1)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Mutation {
        Location(u8),
        Active(bool),
        Available(bool),
        Exhibit(Option<u8>),
        ToursCompleted(u32),
    }

    fn mutation() -> impl Strategy<Value = Mutation> {
        prop_oneof![
            (0u8..3).prop_map(Mutation::Location),
            any::<bool>().prop_map(Mutation::Active),
            any::<bool>().prop_map(Mutation::Available),
            proptest::option::of(0u8..3).prop_map(Mutation::Exhibit),
            (0u32..3).prop_map(Mutation::ToursCompleted),
        ]
    }

    fn apply(status: &mut Status, m: &Mutation) {
        match m {
            Mutation::Location(n) => status.set_location(format!("room-{n}")),
            Mutation::Active(v) => status.set_active(*v),
            Mutation::Available(v) => status.set_available(*v),
            Mutation::Exhibit(e) => {
                status.update_properties(|p| p.current_exhibit = e.map(|n| format!("ex-{n}")))
            }
            Mutation::ToursCompleted(n) => status.update_properties(|p| p.tours_completed = *n),
        }
    }

    #[test]
    fn test_identical_write_does_not_bump() {
        let mut status = Status::new("Hall");
        let before = status.last_update();
        status.set_location("Hall");
        status.set_available(true);
        status.update_properties(|_| {});
        assert_eq!(status.last_update(), before);
    }

    #[test]
    fn test_change_bumps_even_within_same_instant() {
        let mut status = Status::new("Hall");
        let mut last = status.last_update();
        for n in 0..100 {
            status.update_properties(|p| p.tours_completed = n + 1);
            assert!(status.last_update() > last);
            last = status.last_update();
        }
    }

    #[test]
    fn test_snapshot_is_independent_copy() {
        let mut status = Status::new("Hall");
        let snapshot = status.snapshot();
        status.set_location("Salle des États");
        assert_eq!(snapshot.location(), "Hall");
    }

    #[test]
    fn test_serializes_typed_properties() {
        let mut status = Status::new("Hall");
        status.update_properties(|p| {
            p.language = Some("French".to_string());
            p.extra.insert("floor".to_string(), serde_json::json!(1));
        });
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["properties"]["language"], "French");
        assert_eq!(json["properties"]["extra"]["floor"], 1);
        assert!(json["properties"].get("current_group").is_none());
    }

    proptest! {
        #[test]
        fn prop_last_update_monotonic(mutations in proptest::collection::vec(mutation(), 1..40)) {
            let mut status = Status::new("room-0");
            for m in &mutations {
                let before = status.clone();
                apply(&mut status, m);
                let changed = before.location() != status.location()
                    || before.is_active() != status.is_active()
                    || before.is_available() != status.is_available()
                    || before.properties() != status.properties();
                if changed {
                    prop_assert!(status.last_update() > before.last_update());
                } else {
                    prop_assert_eq!(status.last_update(), before.last_update());
                }
            }
        }
    }
}
