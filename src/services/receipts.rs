use crate::error::AgentError;
use crate::models::{ReceiptRecord, MOCK_PROOF};
use crate::services::Storage;
use std::sync::Arc;

/// Well-known storage key of the receipt history.
pub const RECEIPTS_KEY: &str = "veyrun_receipts";

const DEFAULT_ASSET: &str = "USDC";
const DEFAULT_DESCRIPTION: &str = "x402 Payment Required";

/// Append-only, deduplicated payment history, newest first. Simulated
/// receipts (mock proof) never enter it and are purged when a real receipt
/// arrives.
pub struct ReceiptStore {
    storage: Arc<Storage>,
    write_lock: tokio::sync::Mutex<()>,
}

impl ReceiptStore {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub async fn append(&self, receipt: ReceiptRecord) -> Result<(), AgentError> {
        if receipt.proof == MOCK_PROOF {
            tracing::debug!(receipt_id = %receipt.receipt_id, "skipping simulated receipt");
            return Ok(());
        }

        // Read-modify-write against the latest persisted list; a cached
        // copy could lose entries appended since.
        let _guard = self.write_lock.lock().await;
        let mut list: Vec<ReceiptRecord> =
            self.storage.get(RECEIPTS_KEY).await?.unwrap_or_default();
        list.retain(|r| r.proof != MOCK_PROOF);
        list.insert(0, receipt);
        self.storage.put(RECEIPTS_KEY, &list).await
    }

    pub async fn list(&self) -> Result<Vec<ReceiptRecord>, AgentError> {
        let list: Vec<ReceiptRecord> =
            self.storage.get(RECEIPTS_KEY).await?.unwrap_or_default();
        Ok(list
            .into_iter()
            .filter(|r| r.proof != MOCK_PROOF)
            .map(|mut r| {
                if r.asset.is_empty() {
                    r.asset = DEFAULT_ASSET.to_string();
                }
                if r.description.is_none() {
                    r.description = Some(DEFAULT_DESCRIPTION.to_string());
                }
                r
            })
            .collect())
    }
}
