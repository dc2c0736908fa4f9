use crate::config::Config;
use crate::error::AgentError;
use crate::models::WalletRecord;
use crate::services::Storage;
use anyhow::Result;
use chrono::{DateTime, Utc};
use ethers::{
    prelude::*,
    providers::{Http, Provider},
    types::{Address, U256},
    utils::{format_units, parse_units},
};
use moka::future::Cache;
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Well-known storage key of the wallet record.
pub const WALLET_KEY: &str = "veyrun_wallet";

const BALANCE_TTL_SECS: u64 = 12;

// USDC contract ABI for the calls the agent makes
abigen!(
    IERC20,
    r#"[
        function transfer(address to, uint256 amount) external returns (bool)
        function balanceOf(address account) external view returns (uint256)
        function decimals() external view returns (uint8)
    ]"#
);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletStatus {
    pub has_wallet: bool,
    pub address: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub chain_id: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainInfo {
    pub id: u64,
    pub name: String,
    pub rpc_url: String,
}

/// Key custody and chain access. The record is a single logical value:
/// reads come from the in-memory copy, and create/import replace both the
/// persisted and in-memory copy as one serialized operation.
pub struct WalletService {
    storage: Arc<Storage>,
    provider: Arc<Provider<Http>>,
    usdc_address: Address,
    chain_id: u64,
    chain_name: String,
    rpc_url: String,
    record: RwLock<Option<WalletRecord>>,
    write_lock: tokio::sync::Mutex<()>,
    balance_cache: Cache<String, String>,
}

impl WalletService {
    pub async fn new(config: &Config, storage: Arc<Storage>) -> Result<Self> {
        let provider = Arc::new(Provider::<Http>::try_from(config.rpc_url.as_str())?);
        let record: Option<WalletRecord> = storage.get(WALLET_KEY).await?;

        if let Some(ref record) = record {
            tracing::info!(address = %record.address, "wallet loaded");
        } else {
            tracing::info!("no wallet provisioned yet");
        }

        Ok(Self {
            storage,
            provider,
            usdc_address: config.usdc_address,
            chain_id: config.chain_id,
            chain_name: config.chain_name().to_string(),
            rpc_url: config.rpc_url.clone(),
            record: RwLock::new(record),
            write_lock: tokio::sync::Mutex::new(()),
            balance_cache: Cache::builder()
                .max_capacity(16)
                .time_to_live(Duration::from_secs(BALANCE_TTL_SECS))
                .build(),
        })
    }

    fn current(&self) -> Option<WalletRecord> {
        self.record
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_provisioned(&self) -> bool {
        self.record
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub fn status(&self) -> WalletStatus {
        let record = self.current();
        WalletStatus {
            has_wallet: record.is_some(),
            address: record.as_ref().map(|r| r.address.clone()),
            created_at: record.as_ref().map(|r| r.created_at),
            chain_id: record.map(|r| r.chain_id).unwrap_or(self.chain_id),
        }
    }

    pub fn chain_info(&self) -> ChainInfo {
        ChainInfo {
            id: self.chain_id,
            name: self.chain_name.clone(),
            rpc_url: self.rpc_url.clone(),
        }
    }

    pub async fn create(&self) -> Result<WalletRecord, AgentError> {
        let wallet = LocalWallet::new(&mut ethers::core::rand::thread_rng());
        let record = WalletRecord {
            private_key: format!("0x{}", hex::encode(wallet.signer().to_bytes())),
            address: format!("{:?}", wallet.address()),
            created_at: Utc::now(),
            chain_id: self.chain_id,
        };
        self.replace(record).await
    }

    pub async fn import(&self, private_key: &str) -> Result<WalletRecord, AgentError> {
        if !private_key.starts_with("0x") || private_key.len() != 66 {
            return Err(AgentError::InvalidInput(
                "Private key must be a 32-byte hex string.".to_string(),
            ));
        }
        let wallet = private_key
            .parse::<LocalWallet>()
            .map_err(|e| AgentError::InvalidInput(format!("Invalid private key: {}", e)))?;
        let record = WalletRecord {
            private_key: private_key.to_string(),
            address: format!("{:?}", wallet.address()),
            created_at: Utc::now(),
            chain_id: self.chain_id,
        };
        self.replace(record).await
    }

    // Persist first, then swap the in-memory copy, under a single writer
    // lock; concurrent create/import calls cannot interleave.
    async fn replace(&self, record: WalletRecord) -> Result<WalletRecord, AgentError> {
        let _guard = self.write_lock.lock().await;
        self.storage.put(WALLET_KEY, &record).await?;
        *self.record.write().unwrap_or_else(|e| e.into_inner()) = Some(record.clone());
        tracing::info!(address = %record.address, "wallet record replaced");
        Ok(record)
    }

    pub fn export_key(&self) -> Result<String, AgentError> {
        self.current()
            .map(|r| r.private_key)
            .ok_or(AgentError::NoWallet)
    }

    pub async fn sign_payload(&self, payload: &str) -> Result<String, AgentError> {
        let wallet = self.local_wallet()?;
        let signature = wallet
            .sign_message(payload)
            .await
            .map_err(|e| AgentError::Payment(format!("Signing failed: {}", e)))?;
        Ok(format!("0x{}", signature))
    }

    fn local_wallet(&self) -> Result<LocalWallet, AgentError> {
        let record = self.current().ok_or(AgentError::NoWallet)?;
        let wallet = record
            .private_key
            .parse::<LocalWallet>()
            .map_err(|e| AgentError::Payment(format!("Stored key unusable: {}", e)))?;
        Ok(wallet.with_chain_id(record.chain_id))
    }

    pub async fn usdc_balance(&self) -> Result<String, AgentError> {
        let record = self.current().ok_or(AgentError::NoWallet)?;
        if let Some(cached) = self.balance_cache.get(&record.address).await {
            tracing::debug!("balance cache hit");
            return Ok(cached);
        }

        let address: Address = record
            .address
            .parse()
            .map_err(|_| AgentError::Payment("Stored address unusable".to_string()))?;
        let usdc = IERC20::new(self.usdc_address, self.provider.clone());
        let balance: U256 = usdc
            .balance_of(address)
            .call()
            .await
            .map_err(|e| AgentError::Rpc(e.to_string()))?;

        let formatted = trim_decimal(
            &format_units(balance, 6u32).map_err(|e| AgentError::Rpc(e.to_string()))?,
        );
        self.balance_cache
            .insert(record.address, formatted.clone())
            .await;
        Ok(formatted)
    }

    /// Sends an on-chain USDC transfer and waits for confirmation.
    /// Returns the transaction hash.
    pub async fn transfer_usdc(&self, recipient: &str, amount: &str) -> Result<String, AgentError> {
        let wallet = self.local_wallet()?;
        let recipient: Address = recipient
            .parse()
            .map_err(|_| AgentError::Payment(format!("Invalid recipient address: {}", recipient)))?;
        let value: U256 = parse_units(amount, 6u32)
            .map_err(|e| AgentError::Payment(format!("Invalid amount {}: {}", amount, e)))?
            .into();

        let client = Arc::new(SignerMiddleware::new((*self.provider).clone(), wallet));
        let usdc = IERC20::new(self.usdc_address, client.clone());

        let balance = usdc
            .balance_of(client.address())
            .call()
            .await
            .map_err(|e| AgentError::Rpc(e.to_string()))?;
        if balance < value {
            return Err(AgentError::Payment(format!(
                "Insufficient USDC balance: {} < {}",
                format_units(balance, 6u32).unwrap_or_default(),
                amount
            )));
        }

        tracing::info!(%recipient, amount, "sending USDC transfer");

        let call = usdc.transfer(recipient, value);
        let pending = call
            .send()
            .await
            .map_err(|e| AgentError::Payment(format!("Failed to send USDC transfer: {}", e)))?;
        let receipt = pending
            .await
            .map_err(|e| AgentError::Payment(format!("Failed to get transaction receipt: {}", e)))?
            .ok_or_else(|| AgentError::Payment("Transaction dropped".to_string()))?;

        if receipt.status != Some(1.into()) {
            return Err(AgentError::Payment("Transaction failed onchain".to_string()));
        }

        tracing::info!(tx = ?receipt.transaction_hash, "payment confirmed");
        Ok(format!("{:?}", receipt.transaction_hash))
    }

    pub async fn rpc_ok(&self) -> bool {
        self.provider.get_block_number().await.is_ok()
    }
}

fn trim_decimal(value: &str) -> String {
    if !value.contains('.') {
        return value.to_string();
    }
    value.trim_end_matches('0').trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn service() -> (WalletService, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::for_tests(dir.path());
        let storage = Arc::new(Storage::open(dir.path()).await.unwrap());
        let service = WalletService::new(&config, storage).await.unwrap();
        (service, dir)
    }

    #[tokio::test]
    async fn create_provisions_and_persists() {
        let (service, dir) = service().await;
        assert!(!service.is_provisioned());

        let record = service.create().await.unwrap();
        assert!(record.address.starts_with("0x"));
        assert_eq!(record.private_key.len(), 66);
        assert!(service.is_provisioned());

        // A fresh instance over the same storage sees the record.
        let storage = Arc::new(Storage::open(dir.path()).await.unwrap());
        let reloaded: Option<WalletRecord> = storage.get(WALLET_KEY).await.unwrap();
        assert_eq!(reloaded.unwrap().address, record.address);
    }

    #[tokio::test]
    async fn import_validates_key_shape() {
        let (service, _dir) = service().await;

        assert!(service.import("deadbeef").await.is_err());
        assert!(service.import("0x1234").await.is_err());

        let key = format!("0x{}", "11".repeat(32));
        let record = service.import(&key).await.unwrap();
        assert_eq!(record.private_key, key);
        assert_eq!(service.export_key().unwrap(), key);
    }

    #[tokio::test]
    async fn import_replaces_prior_record() {
        let (service, _dir) = service().await;
        let first = service.create().await.unwrap();
        let key = format!("0x{}", "22".repeat(32));
        let second = service.import(&key).await.unwrap();
        assert_ne!(first.address, second.address);
        assert_eq!(service.status().address.unwrap(), second.address);
    }

    #[tokio::test]
    async fn sign_requires_wallet_and_produces_hex() {
        let (service, _dir) = service().await;
        assert!(matches!(
            service.sign_payload("hello").await,
            Err(AgentError::NoWallet)
        ));

        service.create().await.unwrap();
        let signature = service.sign_payload("hello").await.unwrap();
        assert!(signature.starts_with("0x"));
        assert!(signature.len() > 100);
    }

    #[test]
    fn trims_trailing_zeros() {
        assert_eq!(trim_decimal("1.500000"), "1.5");
        assert_eq!(trim_decimal("1.000000"), "1");
        assert_eq!(trim_decimal("0.000010"), "0.00001");
        assert_eq!(trim_decimal("42"), "42");
    }
}
