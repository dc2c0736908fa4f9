use crate::models::PendingPayment;
use std::collections::HashMap;

/// Per-tab store of unconfirmed page-originated payment requests. At most
/// one per tab; a second direct request overwrites the first.
#[derive(Default)]
pub struct PendingPayments {
    by_tab: HashMap<i64, PendingPayment>,
}

impl PendingPayments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pending: PendingPayment) {
        if self.by_tab.contains_key(&pending.tab_id) {
            tracing::debug!(
                tab_id = pending.tab_id,
                "overwriting earlier pending payment"
            );
        }
        self.by_tab.insert(pending.tab_id, pending);
    }

    pub fn get(&self, tab_id: i64) -> Option<&PendingPayment> {
        self.by_tab.get(&tab_id)
    }

    /// Removes and returns the entry, making confirmation single-shot: a
    /// concurrent duplicate confirm finds nothing pending.
    pub fn take(&mut self, tab_id: i64) -> Option<PendingPayment> {
        self.by_tab.remove(&tab_id)
    }

    pub fn evict(&mut self, tab_id: i64) {
        if self.by_tab.remove(&tab_id).is_some() {
            tracing::debug!(tab_id, "discarded pending payment on tab close");
        }
    }
}
