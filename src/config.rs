use anyhow::{bail, Context, Result};
use ethers::types::Address;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_RPC_URL: &str = "https://sepolia.base.org";
pub const DEFAULT_CHAIN_ID: u64 = 84532;
pub const DEFAULT_USDC_ADDRESS: &str = "0x036CbD53842c5426634e7929541eC2318f3dCF7e";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,

    /// Directory holding the persisted wallet record and receipt history.
    pub storage_dir: PathBuf,

    // Base Sepolia (payment network)
    pub rpc_url: String,
    pub chain_id: u64,
    pub usdc_address: Address,

    /// When set, the protocol client attaches the demo signature instead of
    /// settling on-chain; resulting receipts carry the mock proof and are
    /// excluded from history.
    pub demo_mode: bool,

    /// When set, page-direct payment requests execute without the
    /// confirmation handshake.
    pub auto_approve: bool,

    // Cooldown windows, per payment path
    pub cooldown_confirmed_ms: i64,
    pub cooldown_direct_ms: i64,

    pub confirm_url: String,
    pub topup_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            host: std::env::var("VEYRUN_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: std::env::var("VEYRUN_PORT")
                .unwrap_or_else(|_| "8402".to_string())
                .parse()
                .context("Invalid VEYRUN_PORT")?,

            storage_dir: std::env::var("VEYRUN_STORAGE_DIR")
                .unwrap_or_else(|_| ".veyrun".to_string())
                .into(),

            rpc_url: std::env::var("VEYRUN_RPC_URL")
                .unwrap_or_else(|_| DEFAULT_RPC_URL.to_string()),
            chain_id: std::env::var("VEYRUN_CHAIN_ID")
                .unwrap_or_else(|_| DEFAULT_CHAIN_ID.to_string())
                .parse()
                .context("Invalid VEYRUN_CHAIN_ID")?,
            usdc_address: Self::parse_address("VEYRUN_USDC_ADDRESS", DEFAULT_USDC_ADDRESS)?,

            demo_mode: Self::parse_flag("VEYRUN_DEMO_MODE"),
            auto_approve: Self::parse_flag("VEYRUN_AUTO_APPROVE"),

            cooldown_confirmed_ms: std::env::var("VEYRUN_COOLDOWN_CONFIRMED_MS")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .context("Invalid VEYRUN_COOLDOWN_CONFIRMED_MS")?,
            cooldown_direct_ms: std::env::var("VEYRUN_COOLDOWN_DIRECT_MS")
                .unwrap_or_else(|_| "30000".to_string())
                .parse()
                .context("Invalid VEYRUN_COOLDOWN_DIRECT_MS")?,

            confirm_url: std::env::var("VEYRUN_CONFIRM_URL")
                .unwrap_or_else(|_| "veyrun://confirm".to_string()),
            topup_url: std::env::var("VEYRUN_TOPUP_URL")
                .unwrap_or_else(|_| "https://faucet.circle.com".to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    fn parse_flag(var: &str) -> bool {
        std::env::var(var)
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false)
    }

    fn parse_address(var: &str, default: &str) -> Result<Address> {
        let addr_str = std::env::var(var).unwrap_or_else(|_| default.to_string());
        Address::from_str(&addr_str).with_context(|| format!("Invalid address for {}", var))
    }

    fn validate(&self) -> Result<()> {
        if !self.rpc_url.starts_with("http") {
            bail!("VEYRUN_RPC_URL must be HTTP(S) URL");
        }
        if self.cooldown_confirmed_ms <= 0 || self.cooldown_direct_ms <= 0 {
            bail!("Cooldown windows must be positive");
        }

        tracing::info!(
            chain_id = self.chain_id,
            demo_mode = self.demo_mode,
            "Configuration validated"
        );

        Ok(())
    }

    pub fn chain_name(&self) -> &'static str {
        match self.chain_id {
            84532 => "Base Sepolia",
            8453 => "Base",
            _ => "Unknown",
        }
    }
}

#[cfg(test)]
impl Config {
    pub fn for_tests(storage_dir: &std::path::Path) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            storage_dir: storage_dir.to_path_buf(),
            rpc_url: DEFAULT_RPC_URL.to_string(),
            chain_id: DEFAULT_CHAIN_ID,
            usdc_address: DEFAULT_USDC_ADDRESS.parse().expect("const address"),
            demo_mode: true,
            auto_approve: false,
            cooldown_confirmed_ms: 5000,
            cooldown_direct_ms: 30000,
            confirm_url: "veyrun://confirm".to_string(),
            topup_url: "https://faucet.circle.com".to_string(),
        }
    }
}
