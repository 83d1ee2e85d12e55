use serde::{Deserialize, Serialize};

/// Click event as carried on the broker and the fallback stream.
///
/// The broker partition key is `short_code`, so every click for one
/// URL lands on a single consumer and aggregation needs no
/// cross-worker locking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickEvent {
    pub short_code: String,
    pub delta: i64,
}

impl ClickEvent {
    /// A single click on `short_code`.
    #[must_use]
    pub fn single(short_code: impl Into<String>) -> Self {
        Self {
            short_code: short_code.into(),
            delta: 1,
        }
    }

    /// Reject payloads that would corrupt the aggregation hash.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.short_code.is_empty() && self.short_code.len() <= 12 && self.delta >= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn click_event_round_trips_through_json() {
        let event = ClickEvent::single("aB3xK9m");
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"short_code":"aB3xK9m","delta":1}"#);
        let decoded: ClickEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn validation_rejects_bad_payloads() {
        assert!(ClickEvent::single("ok").is_valid());
        assert!(!ClickEvent { short_code: String::new(), delta: 1 }.is_valid());
        assert!(!ClickEvent { short_code: "x".repeat(13), delta: 1 }.is_valid());
        assert!(!ClickEvent { short_code: "ok".to_string(), delta: 0 }.is_valid());
        assert!(!ClickEvent { short_code: "ok".to_string(), delta: -5 }.is_valid());
    }
}
