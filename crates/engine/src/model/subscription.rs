//! Event subscriptions of waiting processes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A process instance waiting at a receive-event activity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventSubscription {
    pub id: Uuid,
    pub event_name: String,
    /// Key derived from the correlation parameters the activity declares.
    /// `None` matches any event with this name.
    pub correlation_key: Option<String>,
    pub process_instance_id: Uuid,
    pub activity_id: String,
    pub tenant_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl EventSubscription {
    pub fn new(
        event_name: impl Into<String>,
        correlation_key: Option<String>,
        process_instance_id: Uuid,
        activity_id: impl Into<String>,
        tenant_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_name: event_name.into(),
            correlation_key,
            process_instance_id,
            activity_id: activity_id.into(),
            tenant_id,
            created_at: now,
        }
    }

    /// Whether an event with the given name and candidate keys matches.
    pub fn matches(&self, event_name: &str, correlation_keys: &[String]) -> bool {
        self.event_name == event_name
            && self
                .correlation_key
                .as_ref()
                .map_or(true, |key| correlation_keys.contains(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches() {
        let keyed = EventSubscription::new(
            "payment",
            Some("abc".to_string()),
            Uuid::new_v4(),
            "paid",
            None,
            Utc::now(),
        );
        assert!(keyed.matches("payment", &["xyz".to_string(), "abc".to_string()]));
        assert!(!keyed.matches("payment", &["xyz".to_string()]));
        assert!(!keyed.matches("refund", &["abc".to_string()]));

        let unkeyed = EventSubscription::new("payment", None, Uuid::new_v4(), "paid", None, Utc::now());
        assert!(unkeyed.matches("payment", &[]));
    }
}
