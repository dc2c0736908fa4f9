use crate::models::PaymentEvent;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// How long a captured 402 stays actionable.
pub const EVENT_TTL_MINUTES: i64 = 5;

/// Per-tab store of the most recent decoded payment event. At most one live
/// event per tab; a newer capture overwrites the older one.
#[derive(Default)]
pub struct FreshnessCache {
    events: HashMap<i64, PaymentEvent>,
}

impl FreshnessCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: PaymentEvent) {
        tracing::debug!(tab_id = event.tab_id, url = %event.url, "402 captured");
        self.events.insert(event.tab_id, event);
    }

    /// Returns the event for a tab only while it is fresh. Stale entries are
    /// indistinguishable from absent ones for every caller.
    pub fn fresh(&self, tab_id: i64, now: DateTime<Utc>) -> Option<&PaymentEvent> {
        self.events
            .get(&tab_id)
            .filter(|event| is_fresh(event, now))
    }

    pub fn evict(&mut self, tab_id: i64) {
        self.events.remove(&tab_id);
    }

    /// Badge text for a tab: set while a fresh 402 exists, cleared otherwise.
    pub fn badge_text(&self, tab_id: i64, now: DateTime<Utc>) -> &'static str {
        if self.fresh(tab_id, now).is_some() {
            "402"
        } else {
            ""
        }
    }
}

pub fn is_fresh(event: &PaymentEvent, now: DateTime<Utc>) -> bool {
    now - event.captured_at <= Duration::minutes(EVENT_TTL_MINUTES)
}
