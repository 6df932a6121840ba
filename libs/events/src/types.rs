//! Event type definitions for monitoring.
//!
//! The lifecycle enums live here rather than in the engine so that sinks and
//! dashboards can decode events without depending on the engine crate.

use galerie_id::{GroupId, GuideId};
use serde::{Deserialize, Serialize};

use crate::EventError;

// =============================================================================
// Event Type Constants
// =============================================================================

/// All event type names as constants.
pub mod event_types {
    // Guide
    pub const GUIDE_ADDED: &str = "guide.added";
    pub const GUIDE_STATUS_CHANGED: &str = "guide.status_changed";

    // Group
    pub const GROUP_ADDED: &str = "group.added";
    pub const GROUP_STATUS_CHANGED: &str = "group.status_changed";
    pub const GROUP_DEPARTED: &str = "group.departed";

    // Tour
    pub const TOUR_EXHIBIT_PRESENTED: &str = "tour.exhibit_presented";
    pub const TOUR_COMPLETED: &str = "tour.completed";
}

// =============================================================================
// Lifecycle Enums
// =============================================================================

/// Guide lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuideState {
    /// Advertised in the directory and able to accept a tour.
    Available,
    /// Accepted a request, waiting for the group to show up.
    Offered,
    /// Presenting exhibits.
    OnTour,
    /// Taken offline after a reported problem, until reset.
    Blocked,
}

impl std::fmt::Display for GuideState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GuideState::Available => "available",
            GuideState::Offered => "offered",
            GuideState::OnTour => "on_tour",
            GuideState::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

/// Visitor group lifecycle status.
///
/// Variants are declared in lifecycle order; `Ord` follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    Waiting,
    Assigned,
    Touring,
    Finished,
    Departed,
}

impl GroupStatus {
    /// Whether moving from `self` to `next` is a legal lifecycle step.
    ///
    /// Forward moves advance exactly one step. The only backward move is the
    /// return to `Waiting` after a guide problem, allowed before `Finished`.
    pub fn can_transition_to(self, next: GroupStatus) -> bool {
        use GroupStatus::*;
        match (self, next) {
            (Waiting, Assigned)
            | (Assigned, Touring)
            | (Touring, Finished)
            | (Finished, Departed) => true,
            (Assigned | Touring, Waiting) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GroupStatus::Waiting => "waiting",
            GroupStatus::Assigned => "assigned",
            GroupStatus::Touring => "touring",
            GroupStatus::Finished => "finished",
            GroupStatus::Departed => "departed",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// Final figures for a group leaving the museum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitSummary {
    pub group_id: GroupId,
    pub size: u32,
    pub nationality: String,
    pub paintings_seen: u32,
    pub questions_asked: u32,
    pub tour_duration_ms: u64,
    /// Simulated minutes, after the run's time scale is applied.
    pub simulated_minutes: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub satisfaction: Option<u8>,
    pub was_vip: bool,
}

/// Everything a monitoring sink can observe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    GuideAdded {
        guide_id: GuideId,
        name: String,
    },
    GuideStatusChanged {
        guide_id: GuideId,
        status: GuideState,
        #[serde(skip_serializing_if = "Option::is_none")]
        group_id: Option<GroupId>,
    },
    GroupAdded {
        group_id: GroupId,
        nationality: String,
        size: u32,
    },
    GroupStatusChanged {
        group_id: GroupId,
        status: GroupStatus,
    },
    ExhibitPresented {
        guide_id: GuideId,
        group_id: GroupId,
        exhibit: String,
    },
    TourCompleted {
        group_id: GroupId,
        guide_id: GuideId,
        group_size: u32,
    },
    GroupDeparted(VisitSummary),
}

impl MonitorEvent {
    /// Dotted event type name, see [`event_types`].
    pub fn event_type(&self) -> &'static str {
        match self {
            MonitorEvent::GuideAdded { .. } => event_types::GUIDE_ADDED,
            MonitorEvent::GuideStatusChanged { .. } => event_types::GUIDE_STATUS_CHANGED,
            MonitorEvent::GroupAdded { .. } => event_types::GROUP_ADDED,
            MonitorEvent::GroupStatusChanged { .. } => event_types::GROUP_STATUS_CHANGED,
            MonitorEvent::ExhibitPresented { .. } => event_types::TOUR_EXHIBIT_PRESENTED,
            MonitorEvent::TourCompleted { .. } => event_types::TOUR_COMPLETED,
            MonitorEvent::GroupDeparted(_) => event_types::GROUP_DEPARTED,
        }
    }

    /// Decodes an event from JSON, reporting unknown `type` tags distinctly
    /// from malformed payloads.
    pub fn from_json(json: &str) -> Result<Self, EventError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let tag = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| EventError::Serialization("missing event type tag".to_string()))?;

        const KNOWN: &[&str] = &[
            "guide_added",
            "guide_status_changed",
            "group_added",
            "group_status_changed",
            "exhibit_presented",
            "tour_completed",
            "group_departed",
        ];
        if !KNOWN.contains(&tag) {
            return Err(EventError::UnknownEventType(tag.to_string()));
        }

        Ok(serde_json::from_value(value)?)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guide_state_serialization() {
        assert_eq!(
            serde_json::to_string(&GuideState::OnTour).unwrap(),
            "\"on_tour\""
        );
        assert_eq!(GuideState::Blocked.to_string(), "blocked");
    }

    #[test]
    fn test_group_status_order_follows_lifecycle() {
        assert!(GroupStatus::Waiting < GroupStatus::Assigned);
        assert!(GroupStatus::Touring < GroupStatus::Finished);
        assert!(GroupStatus::Finished < GroupStatus::Departed);
    }

    #[test]
    fn test_group_status_transitions() {
        use GroupStatus::*;
        assert!(Waiting.can_transition_to(Assigned));
        assert!(Touring.can_transition_to(Waiting));
        assert!(!Finished.can_transition_to(Waiting));
        assert!(!Waiting.can_transition_to(Touring));
        assert!(!Departed.can_transition_to(Waiting));
    }

    #[test]
    fn test_event_type_names() {
        let event = MonitorEvent::GroupAdded {
            group_id: GroupId::new(),
            nationality: "French".to_string(),
            size: 8,
        };
        assert_eq!(event.event_type(), "group.added");
    }

    #[test]
    fn test_from_json_decodes_tagged_event() {
        let event = MonitorEvent::ExhibitPresented {
            guide_id: GuideId::new(),
            group_id: GroupId::new(),
            exhibit: "La Joconde".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"exhibit_presented\""));
        assert_eq!(MonitorEvent::from_json(&json).unwrap(), event);
    }

    #[test]
    fn test_from_json_unknown_type() {
        let err = MonitorEvent::from_json(r#"{"type":"gift_shop_opened"}"#).unwrap_err();
        assert!(matches!(err, EventError::UnknownEventType(t) if t == "gift_shop_opened"));
    }

    #[test]
    fn test_from_json_missing_tag() {
        let err = MonitorEvent::from_json(r#"{"size":3}"#).unwrap_err();
        assert!(matches!(err, EventError::Serialization(_)));
    }

    mod props {
        use super::*;
        use galerie_id::Ulid;
        use proptest::prelude::*;

        fn guide_id() -> impl Strategy<Value = GuideId> {
            any::<u128>().prop_map(|n| GuideId::from_ulid(Ulid::from(n)))
        }

        fn group_id() -> impl Strategy<Value = GroupId> {
            any::<u128>().prop_map(|n| GroupId::from_ulid(Ulid::from(n)))
        }

        fn guide_state() -> impl Strategy<Value = GuideState> {
            prop_oneof![
                Just(GuideState::Available),
                Just(GuideState::Offered),
                Just(GuideState::OnTour),
                Just(GuideState::Blocked),
            ]
        }

        fn group_status() -> impl Strategy<Value = GroupStatus> {
            prop_oneof![
                Just(GroupStatus::Waiting),
                Just(GroupStatus::Assigned),
                Just(GroupStatus::Touring),
                Just(GroupStatus::Finished),
                Just(GroupStatus::Departed),
            ]
        }

        fn summary() -> impl Strategy<Value = VisitSummary> {
            (
                group_id(),
                1u32..40,
                "[A-Z][a-z]{2,10}",
                0u32..20,
                any::<u64>(),
                0u32..600,
                proptest::option::of(1u8..=5),
                any::<bool>(),
            )
                .prop_map(
                    |(group_id, size, nationality, paintings_seen, tour_duration_ms, minutes, satisfaction, was_vip)| {
                        VisitSummary {
                            group_id,
                            size,
                            nationality,
                            paintings_seen,
                            questions_asked: paintings_seen / 2,
                            tour_duration_ms,
                            // Whole minutes keep the float exact through JSON.
                            simulated_minutes: f64::from(minutes),
                            satisfaction,
                            was_vip,
                        }
                    },
                )
        }

        fn event() -> impl Strategy<Value = MonitorEvent> {
            prop_oneof![
                (guide_id(), "\\PC{0,24}")
                    .prop_map(|(guide_id, name)| MonitorEvent::GuideAdded { guide_id, name }),
                (guide_id(), guide_state(), proptest::option::of(group_id())).prop_map(
                    |(guide_id, status, group_id)| MonitorEvent::GuideStatusChanged {
                        guide_id,
                        status,
                        group_id,
                    }
                ),
                (group_id(), "[A-Z][a-z]{2,10}", 1u32..40).prop_map(|(group_id, nationality, size)| {
                    MonitorEvent::GroupAdded {
                        group_id,
                        nationality,
                        size,
                    }
                }),
                (group_id(), group_status())
                    .prop_map(|(group_id, status)| MonitorEvent::GroupStatusChanged { group_id, status }),
                (guide_id(), group_id(), "\\PC{1,32}").prop_map(|(guide_id, group_id, exhibit)| {
                    MonitorEvent::ExhibitPresented {
                        guide_id,
                        group_id,
                        exhibit,
                    }
                }),
                (group_id(), guide_id(), 1u32..40).prop_map(|(group_id, guide_id, group_size)| {
                    MonitorEvent::TourCompleted {
                        group_id,
                        guide_id,
                        group_size,
                    }
                }),
                summary().prop_map(MonitorEvent::GroupDeparted),
            ]
        }

        proptest! {
            #[test]
            fn from_json_reads_back_every_event(event in event()) {
                let json = serde_json::to_string(&event).unwrap();
                prop_assert_eq!(MonitorEvent::from_json(&json).unwrap(), event);
            }

            #[test]
            fn from_json_names_unknown_tags(tag in "[a-z_]{1,20}") {
                let known = [
                    "guide_added",
                    "guide_status_changed",
                    "group_added",
                    "group_status_changed",
                    "exhibit_presented",
                    "tour_completed",
                    "group_departed",
                ];
                prop_assume!(!known.contains(&tag.as_str()));
                let json = serde_json::json!({ "type": tag }).to_string();
                let err = MonitorEvent::from_json(&json).unwrap_err();
                prop_assert!(matches!(err, EventError::UnknownEventType(t) if t == tag));
            }

            #[test]
            fn departed_is_final(next in group_status()) {
                prop_assert!(!GroupStatus::Departed.can_transition_to(next));
            }
        }
    }
}
