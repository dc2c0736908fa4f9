use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Per-resource-URL timestamps guarding against duplicate in-flight or rapid
/// repeat payment attempts. Process-lifetime only; never persisted.
#[derive(Default)]
pub struct CooldownLedger {
    attempts: HashMap<String, DateTime<Utc>>,
}

impl CooldownLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `now` and returns true if the last attempt for `key` is
    /// outside `window_ms`. A rejected attempt leaves the stored timestamp
    /// untouched, so hammering a guarded URL cannot extend its own cooldown.
    pub fn try_acquire(&mut self, key: &str, window_ms: i64, now: DateTime<Utc>) -> bool {
        if let Some(last) = self.attempts.get(key) {
            if now - *last < Duration::milliseconds(window_ms) {
                tracing::debug!(key, "payment attempt within cooldown window");
                return false;
            }
        }
        self.attempts.insert(key.to_string(), now);
        true
    }
}
