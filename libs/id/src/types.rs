//! Typed ID definitions for the simulation's agents and negotiations.

use crate::define_id;

// =============================================================================
// Agents
// =============================================================================

define_id!(GuideId, "guide");
define_id!(GroupId, "grp");

// =============================================================================
// Negotiation
// =============================================================================

define_id!(RequestId, "req");
define_id!(AssignmentId, "asgn");

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_guide_id_roundtrip() {
        let id = GuideId::new();
        let s = id.to_string();
        let parsed: GuideId = s.parse().unwrap();
        assert_eq!(id, parsed);
        assert!(s.starts_with("guide_"));
    }

    #[test]
    fn test_group_id_rejects_guide_prefix() {
        let guide = GuideId::new().to_string();
        let result: Result<GroupId, _> = guide.parse();
        assert!(matches!(
            result.unwrap_err(),
            crate::IdError::InvalidPrefix { expected: "grp", .. }
        ));
    }

    #[test]
    fn test_missing_separator() {
        let result: Result<GroupId, _> = "grp01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert!(matches!(result.unwrap_err(), crate::IdError::MissingSeparator));
    }

    #[test]
    fn test_empty() {
        let result: Result<RequestId, _> = "".parse();
        assert!(result.unwrap_err().is_empty());
    }

    #[test]
    fn test_invalid_ulid() {
        let result: Result<AssignmentId, _> = "asgn_invalid".parse();
        assert!(matches!(result.unwrap_err(), crate::IdError::InvalidUlid(_)));
    }

    #[test]
    fn test_json_is_prefixed_string() {
        let id = RequestId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
        let parsed: RequestId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_ids_sortable_by_creation() {
        let id1 = GroupId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = GroupId::new();
        assert!(id1 < id2);
    }

    #[test]
    fn test_all_id_prefixes_unique() {
        let prefixes = [
            GuideId::PREFIX,
            GroupId::PREFIX,
            RequestId::PREFIX,
            AssignmentId::PREFIX,
        ];

        let unique: std::collections::HashSet<_> = prefixes.iter().collect();
        assert_eq!(prefixes.len(), unique.len(), "Duplicate ID prefixes found!");
    }

    proptest! {
        #[test]
        fn prop_parse_display_roundtrip(raw in any::<u128>()) {
            let id = GuideId::from_ulid(crate::Ulid::from(raw));
            let parsed = GuideId::parse(&id.to_string()).unwrap();
            prop_assert_eq!(id, parsed);
        }
    }
}
