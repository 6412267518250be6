//! Typed IDs for reconciliation bookkeeping.

use crate::define_id;

// =============================================================================
// Reconciliation
// =============================================================================

// One reconcile pass over a single instance set.
define_id!(PassId, "pass");

// A recorded event (warning or normal) attached to an instance set.
define_id!(EventId, "evt");

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IdError;

    #[test]
    fn test_pass_id_roundtrip() {
        let id = PassId::new();
        let parsed: PassId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_event_id_prefix() {
        let id = EventId::new();
        assert!(id.to_string().starts_with("evt_"));
    }

    #[test]
    fn test_invalid_prefix() {
        let id = PassId::new().to_string().replacen("pass", "evt", 1);
        let result: Result<PassId, _> = id.parse();
        assert!(matches!(result, Err(IdError::InvalidPrefix { .. })));
    }

    #[test]
    fn test_missing_separator() {
        let result: Result<EventId, _> = "evt01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert_eq!(result.unwrap_err(), IdError::MissingSeparator);
    }

    #[test]
    fn test_empty() {
        let result: Result<EventId, _> = "".parse();
        assert_eq!(result.unwrap_err(), IdError::Empty);
    }

    #[test]
    fn test_serde_as_string() {
        let id = EventId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: EventId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
