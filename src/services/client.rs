use crate::error::AgentError;
use crate::models::{
    PaymentRequirement, HEADER_PAYMENT_SIGNATURE, HEADER_PAYMENT_TX, MOCK_SIGNATURE,
};
use crate::services::WalletService;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

/// Outcome of an unlock attempt, transport-agnostic so the pipeline can be
/// exercised without a live server.
#[derive(Debug, Clone)]
pub struct PaidResponse {
    pub status: u16,
    headers: HashMap<String, String>,
    pub body: Option<String>,
}

impl PaidResponse {
    pub fn from_parts(
        status: u16,
        headers: impl IntoIterator<Item = (String, String)>,
        body: Option<String>,
    ) -> Self {
        Self {
            status,
            headers: headers
                .into_iter()
                .map(|(name, value)| (name.to_lowercase(), value))
                .collect(),
            body,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }
}

/// The external payment-protocol leg: perform the resource request with
/// payment attached and hand back whatever the server answered.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    async fn request_with_payment(
        &self,
        url: &str,
        method: &str,
        requirement: &PaymentRequirement,
    ) -> Result<PaidResponse, AgentError>;
}

/// HTTP implementation. In demo mode it attaches the mock signature demo
/// servers accept; otherwise it settles the requirement on-chain first and
/// attaches the signed payload plus the transfer hash.
pub struct HttpProtocolClient {
    http: reqwest::Client,
    wallet: Arc<WalletService>,
    demo_mode: bool,
}

impl HttpProtocolClient {
    pub fn new(wallet: Arc<WalletService>, demo_mode: bool) -> Self {
        Self {
            http: reqwest::Client::new(),
            wallet,
            demo_mode,
        }
    }
}

#[async_trait]
impl ProtocolClient for HttpProtocolClient {
    async fn request_with_payment(
        &self,
        url: &str,
        method: &str,
        requirement: &PaymentRequirement,
    ) -> Result<PaidResponse, AgentError> {
        let payload = json!({
            "resource": url,
            "amount": requirement.amount,
            "asset": requirement.asset,
            "chain": requirement.chain,
            "recipient": requirement.recipient,
            "nonce": requirement.nonce,
            "timestamp": Utc::now(),
        })
        .to_string();

        let (signature, tx_hash) = if self.demo_mode {
            (MOCK_SIGNATURE.to_string(), None)
        } else {
            let tx_hash = self
                .wallet
                .transfer_usdc(&requirement.recipient, &requirement.amount)
                .await?;
            let signature = self.wallet.sign_payload(&payload).await?;
            (signature, Some(tx_hash))
        };

        let method = reqwest::Method::from_bytes(method.as_bytes())
            .unwrap_or(reqwest::Method::GET);
        let mut request = self
            .http
            .request(method, url)
            .header(HEADER_PAYMENT_SIGNATURE, signature);
        if let Some(tx_hash) = tx_hash {
            request = request.header(HEADER_PAYMENT_TX, tx_hash);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AgentError::Payment(format!("Unlock request failed: {}", e)))?;

        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.text().await.ok();

        Ok(PaidResponse::from_parts(status, headers, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::HEADER_PAYMENT_RESPONSE;
    use crate::services::Storage;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use chrono::Utc;

    fn requirement() -> PaymentRequirement {
        PaymentRequirement {
            asset: "USDC".to_string(),
            amount: "1.00".to_string(),
            chain: "base-sepolia".to_string(),
            recipient: "0x09b84e3a3140ecbd4eed8cf184126ab256b5a2a0".to_string(),
            nonce: "article".to_string(),
            expires_at: Utc::now(),
            description: None,
        }
    }

    async fn demo_client(dir: &tempfile::TempDir) -> HttpProtocolClient {
        let config = Config::for_tests(dir.path());
        let storage = Arc::new(Storage::open(dir.path()).await.unwrap());
        let wallet = Arc::new(WalletService::new(&config, storage).await.unwrap());
        HttpProtocolClient::new(wallet, true)
    }

    #[tokio::test]
    async fn demo_mode_attaches_mock_signature() {
        let mut server = mockito::Server::new_async().await;
        let receipt = json!({
            "receiptId": "rcpt_demo",
            "amount": "1.00",
            "proof": "mock-proof",
            "merchantId": "ozentti"
        });
        let mock = server
            .mock("GET", "/article")
            .match_header(HEADER_PAYMENT_SIGNATURE, MOCK_SIGNATURE)
            .with_status(200)
            .with_header(HEADER_PAYMENT_RESPONSE, &STANDARD.encode(receipt.to_string()))
            .with_body(r#"{"content":"unlocked"}"#)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = demo_client(&dir).await;
        let url = format!("{}/article", server.url());
        let response = client
            .request_with_payment(&url, "GET", &requirement())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.status, 200);
        assert!(response.header(HEADER_PAYMENT_RESPONSE).is_some());
        assert!(response.body.unwrap().contains("unlocked"));
    }

    #[tokio::test]
    async fn header_lookup_is_case_insensitive() {
        let response = PaidResponse::from_parts(
            200,
            vec![("PAYMENT-RESPONSE".to_string(), "abc".to_string())],
            None,
        );
        assert_eq!(response.header("payment-response"), Some("abc"));
        assert_eq!(response.header("Payment-Response"), Some("abc"));
        assert_eq!(response.header("X-Payment-Response"), None);
    }
}
