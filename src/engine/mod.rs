pub mod cooldown;
pub mod freshness;
pub mod pending;

use crate::codec;
use crate::config::Config;
use crate::error::AgentError;
use crate::models::{
    InterceptNotice, OutboundEvent, PaymentEvent, PaymentRequirement, PendingPayment, RpcRequest,
    HEADER_PAYMENT_REQUIRED,
};
use crate::services::{ConfirmationSurface, PaymentPipeline, ReceiptStore, WalletService};
use chrono::{DateTime, Utc};
use cooldown::CooldownLedger;
use freshness::FreshnessCache;
use pending::PendingPayments;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use uuid::Uuid;

pub type MsgResult = Result<Value, AgentError>;
type Reply = oneshot::Sender<MsgResult>;

/// One queued unit of work for the engine. UI messages carry a reply
/// channel; host notifications are fire-and-forget.
pub enum Command {
    Rpc(RpcRequest, Reply),
    ResponseObserved(InterceptNotice),
    TabClosed { tab_id: i64 },
    TabActivated { tab_id: i64 },
}

/// Cloneable sender half of the engine queue.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Command>,
}

impl EngineHandle {
    /// Sends a message and waits for its (possibly deferred) reply.
    pub async fn request(&self, request: RpcRequest) -> MsgResult {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(Command::Rpc(request, reply_tx)).await.is_err() {
            return Err(AgentError::Internal(anyhow::anyhow!("engine stopped")));
        }
        reply_rx
            .await
            .unwrap_or_else(|_| Err(AgentError::Internal(anyhow::anyhow!("reply dropped"))))
    }

    pub async fn notify(&self, command: Command) {
        let _ = self.tx.send(command).await;
    }
}

/// The orchestrator. Owns the freshness cache, cooldown ledger and pending
/// store outright; commands are dispatched one at a time, all store
/// mutations happen synchronously inside a turn, and only the external
/// legs (payments, storage, signing) run as spawned continuations.
pub struct Engine {
    config: Config,
    events: FreshnessCache,
    pending: PendingPayments,
    cooldowns: CooldownLedger,
    active_tab: Option<i64>,
    last_ping_at: Option<DateTime<Utc>>,
    wallet: Arc<WalletService>,
    pipeline: Arc<PaymentPipeline>,
    receipts: Arc<ReceiptStore>,
    surface: Arc<dyn ConfirmationSurface>,
    broadcast: broadcast::Sender<OutboundEvent>,
}

impl Engine {
    pub fn spawn(
        config: Config,
        wallet: Arc<WalletService>,
        pipeline: Arc<PaymentPipeline>,
        receipts: Arc<ReceiptStore>,
        surface: Arc<dyn ConfirmationSurface>,
        broadcast: broadcast::Sender<OutboundEvent>,
    ) -> EngineHandle {
        let (tx, mut rx) = mpsc::channel(64);
        let mut engine = Engine {
            config,
            events: FreshnessCache::new(),
            pending: PendingPayments::new(),
            cooldowns: CooldownLedger::new(),
            active_tab: None,
            last_ping_at: None,
            wallet,
            pipeline,
            receipts,
            surface,
            broadcast,
        };
        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                engine.dispatch(command);
            }
            tracing::debug!("engine queue closed");
        });
        EngineHandle { tx }
    }

    fn dispatch(&mut self, command: Command) {
        let now = Utc::now();
        match command {
            Command::Rpc(request, reply) => self.dispatch_rpc(request, reply, now),
            Command::ResponseObserved(notice) => self.on_response(notice, now),
            Command::TabClosed { tab_id } => self.on_tab_closed(tab_id),
            Command::TabActivated { tab_id } => self.on_tab_activated(tab_id, now),
        }
    }

    fn dispatch_rpc(&mut self, request: RpcRequest, reply: Reply, now: DateTime<Utc>) {
        match request {
            RpcRequest::Ping => {
                self.last_ping_at = Some(now);
                respond(reply, Ok(json!({})));
            }
            RpcRequest::GetStatus => respond(
                reply,
                Ok(json!({
                    "lastPingAt": self.last_ping_at,
                    "headerName": HEADER_PAYMENT_REQUIRED,
                })),
            ),
            RpcRequest::GetLastEvent { tab_id } => {
                let event = self.events.fresh(tab_id, now);
                respond(reply, Ok(json!({ "event": event })));
            }
            RpcRequest::DecodeHeader { value } => {
                let parsed = codec::decode_payment_required(&value);
                respond(reply, Ok(json!({ "parsed": parsed })));
            }
            RpcRequest::WalletStatus => respond(reply, to_json(&self.wallet.status())),
            RpcRequest::CreateWallet => {
                let wallet = self.wallet.clone();
                tokio::spawn(async move {
                    let result = wallet
                        .create()
                        .await
                        .map(|record| json!({"address": record.address}));
                    respond(reply, result);
                });
            }
            RpcRequest::ImportWallet { private_key } => {
                let wallet = self.wallet.clone();
                tokio::spawn(async move {
                    let result = wallet
                        .import(&private_key)
                        .await
                        .map(|record| json!({"address": record.address}));
                    respond(reply, result);
                });
            }
            RpcRequest::ExportKey => respond(
                reply,
                self.wallet.export_key().map(|key| json!({"privateKey": key})),
            ),
            RpcRequest::SignPayload { payload } => {
                let wallet = self.wallet.clone();
                tokio::spawn(async move {
                    let result = wallet
                        .sign_payload(&payload)
                        .await
                        .map(|signature| json!({"signature": signature}));
                    respond(reply, result);
                });
            }
            RpcRequest::ChainInfo => {
                respond(reply, Ok(json!({"chain": self.wallet.chain_info()})));
            }
            RpcRequest::GetBalance => {
                let wallet = self.wallet.clone();
                tokio::spawn(async move {
                    let result = wallet
                        .usdc_balance()
                        .await
                        .map(|balance| json!({"balance": balance}));
                    respond(reply, result);
                });
            }
            RpcRequest::PayForTab { tab_id } => self.start_operator_payment(tab_id, reply, now),
            RpcRequest::PayDirect {
                tab_id,
                requirement,
                url,
                method,
            } => self.start_direct_payment(tab_id, requirement, url, method, reply, now),
            RpcRequest::GetPendingPayment { tab_id } => {
                let pending = self.pending.get(tab_id).map(|p| {
                    json!({
                        "amount": p.requirement.amount,
                        "recipient": p.requirement.recipient,
                        "description": p.description,
                        "url": p.url,
                    })
                });
                respond(reply, Ok(json!({ "pending": pending })));
            }
            RpcRequest::ConfirmPendingPayment { tab_id } => {
                self.confirm_pending(tab_id, reply, now)
            }
            RpcRequest::CancelPendingPayment { tab_id } => {
                self.pending.take(tab_id);
                respond(reply, Ok(json!({})));
            }
            RpcRequest::ListReceipts => {
                let receipts = self.receipts.clone();
                tokio::spawn(async move {
                    let result = receipts.list().await.map(|list| json!({ "receipts": list }));
                    respond(reply, result);
                });
            }
            RpcRequest::OpenTopup => {
                let url = match self.wallet.status().address {
                    Some(address) => format!("{}?address={}", self.config.topup_url, address),
                    None => self.config.topup_url.clone(),
                };
                let _ = self.broadcast.send(OutboundEvent::OpenTab { url: url.clone() });
                respond(reply, Ok(json!({ "url": url })));
            }
        }
    }

    // Operator-confirmed path: pay the first accept option of the fresh
    // event for this tab.
    fn start_operator_payment(&mut self, tab_id: i64, reply: Reply, now: DateTime<Utc>) {
        let Some(event) = self.events.fresh(tab_id, now) else {
            respond(reply, Err(AgentError::MissingRequirement));
            return;
        };
        let Some(requirement) = event.requirement.as_ref().and_then(|r| r.first()).cloned()
        else {
            respond(reply, Err(AgentError::MissingRequirement));
            return;
        };
        let (url, method) = (event.url.clone(), event.method.clone());

        if !self.wallet.is_provisioned() {
            respond(reply, Err(AgentError::NoWallet));
            return;
        }
        // Guard check and timestamp write stay inside this turn; the first
        // await of the attempt comes strictly after.
        if !self
            .cooldowns
            .try_acquire(&url, self.config.cooldown_confirmed_ms, now)
        {
            respond(reply, Err(AgentError::CooldownActive(url)));
            return;
        }

        self.spawn_settlement(tab_id, requirement, url, method, reply);
    }

    // Page-direct path: either settle immediately (auto-approve) or park
    // the request and raise the confirmation surface.
    fn start_direct_payment(
        &mut self,
        tab_id: i64,
        requirement: Value,
        url: String,
        method: Option<String>,
        reply: Reply,
        now: DateTime<Utc>,
    ) {
        let Some(requirement) = codec::normalize_accept(&requirement, None, now) else {
            respond(
                reply,
                Err(AgentError::InvalidInput(
                    "Unsupported payment requirement".to_string(),
                )),
            );
            return;
        };
        let method = method.unwrap_or_else(|| "GET".to_string());

        if self.config.auto_approve {
            if !self.wallet.is_provisioned() {
                respond(reply, Err(AgentError::NoWallet));
                return;
            }
            if !self
                .cooldowns
                .try_acquire(&url, self.config.cooldown_direct_ms, now)
            {
                respond(reply, Err(AgentError::CooldownActive(url)));
                return;
            }
            self.spawn_settlement(tab_id, requirement, url, method, reply);
            return;
        }

        let description = requirement.description.clone();
        self.pending.insert(PendingPayment {
            tab_id,
            requirement,
            url,
            method,
            description,
        });

        // Raise the confirmation surface; a blocked window falls back to a
        // plain tab with the same target.
        let surface = self.surface.clone();
        let confirm_url = format!("{}?tabId={}", self.config.confirm_url, tab_id);
        tokio::spawn(async move {
            if let Err(error) = surface.open_window(tab_id, &confirm_url).await {
                tracing::warn!(%error, "confirmation window failed, opening tab");
                if let Err(error) = surface.open_tab(&confirm_url).await {
                    tracing::warn!(%error, "confirmation tab failed too");
                }
            }
        });

        respond(reply, Ok(json!({ "pending": true })));
    }

    fn confirm_pending(&mut self, tab_id: i64, reply: Reply, now: DateTime<Utc>) {
        // Consume the entry before anything can await: a duplicate
        // confirmation must observe no pending payment.
        let Some(pending) = self.pending.take(tab_id) else {
            respond(reply, Err(AgentError::NoPendingPayment));
            return;
        };
        let PendingPayment {
            requirement,
            url,
            method,
            ..
        } = pending;

        if !self.wallet.is_provisioned() {
            respond(reply, Err(AgentError::NoWallet));
            return;
        }
        if !self
            .cooldowns
            .try_acquire(&url, self.config.cooldown_direct_ms, now)
        {
            respond(reply, Err(AgentError::CooldownActive(url)));
            return;
        }

        self.spawn_settlement(tab_id, requirement, url, method, reply);
    }

    // The asynchronous leg of both payment paths. Settlement lands in the
    // receipt store and goes out as a status event to every listener,
    // independent of the direct reply.
    fn spawn_settlement(
        &self,
        tab_id: i64,
        requirement: PaymentRequirement,
        url: String,
        method: String,
        reply: Reply,
    ) {
        let pipeline = self.pipeline.clone();
        let receipts = self.receipts.clone();
        let broadcast = self.broadcast.clone();
        tokio::spawn(async move {
            match pipeline.settle(&requirement, &url, &method).await {
                Ok(settlement) => {
                    if let Err(error) = receipts.append(settlement.receipt.clone()).await {
                        tracing::warn!(%error, "failed to persist receipt");
                    }
                    let _ = broadcast.send(OutboundEvent::PaymentStatus {
                        tab_id,
                        ok: true,
                        receipt: Some(settlement.receipt.clone()),
                        error: None,
                        insufficient: None,
                    });
                    respond(
                        reply,
                        Ok(json!({"receipt": settlement.receipt, "data": settlement.body})),
                    );
                }
                Err(error) => {
                    let error = error.reclassified();
                    let _ = broadcast.send(OutboundEvent::PaymentStatus {
                        tab_id,
                        ok: false,
                        receipt: None,
                        error: Some(error.to_string()),
                        insufficient: error.is_insufficient().then_some(true),
                    });
                    respond(reply, Err(error));
                }
            }
        });
    }

    fn on_response(&mut self, notice: InterceptNotice, now: DateTime<Utc>) {
        if notice.status_code != 402 {
            return;
        }
        let raw_header = header_value(&notice.headers, HEADER_PAYMENT_REQUIRED);
        let requirement = raw_header
            .as_deref()
            .and_then(codec::decode_payment_required)
            .map(|decoded| decoded.requirements);

        let event = PaymentEvent {
            tab_id: notice.tab_id,
            url: notice.url,
            method: notice.method.unwrap_or_else(|| "GET".to_string()),
            captured_at: now,
            request_id: notice
                .request_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            requirement,
            raw_header,
        };
        let tab_id = event.tab_id;
        self.events.record(event);

        if self.active_tab == Some(tab_id) {
            self.publish_badge(tab_id, now);
        }
    }

    // Tab closure purges all per-tab state before any later message
    // referencing the tab can run.
    fn on_tab_closed(&mut self, tab_id: i64) {
        self.events.evict(tab_id);
        self.pending.evict(tab_id);
        if self.active_tab == Some(tab_id) {
            self.active_tab = None;
        }
    }

    fn on_tab_activated(&mut self, tab_id: i64, now: DateTime<Utc>) {
        self.active_tab = Some(tab_id);
        self.publish_badge(tab_id, now);
    }

    fn publish_badge(&self, tab_id: i64, now: DateTime<Utc>) {
        let text = self.events.badge_text(tab_id, now).to_string();
        let _ = self.broadcast.send(OutboundEvent::Badge { tab_id, text });
    }
}

fn respond(reply: Reply, result: MsgResult) {
    let _ = reply.send(result);
}

fn to_json<T: serde::Serialize>(value: &T) -> MsgResult {
    serde_json::to_value(value).map_err(|e| AgentError::Internal(e.into()))
}

fn header_value(headers: &HashMap<String, String>, name: &str) -> Option<String> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HEADER_PAYMENT_RESPONSE, MOCK_PROOF};
    use crate::services::{PaidResponse, ProtocolClient, Storage};
    use async_trait::async_trait;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StubClient {
        calls: AtomicUsize,
        receipt: Value,
        fail_with: Option<String>,
    }

    impl StubClient {
        fn with_receipt(receipt: Value) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                receipt,
                fail_with: None,
            })
        }

        fn failing(message: &str) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                receipt: Value::Null,
                fail_with: Some(message.to_string()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProtocolClient for StubClient {
        async fn request_with_payment(
            &self,
            _url: &str,
            _method: &str,
            _requirement: &PaymentRequirement,
        ) -> Result<PaidResponse, AgentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(message) = &self.fail_with {
                return Err(AgentError::Payment(message.clone()));
            }
            Ok(PaidResponse::from_parts(
                200,
                vec![(
                    HEADER_PAYMENT_RESPONSE.to_string(),
                    STANDARD.encode(self.receipt.to_string()),
                )],
                Some(r#"{"content":"unlocked"}"#.to_string()),
            ))
        }
    }

    #[derive(Default)]
    struct StubSurface {
        fail_window: bool,
        opened: Mutex<Vec<String>>,
    }

    impl StubSurface {
        fn blocked() -> Arc<Self> {
            Arc::new(Self {
                fail_window: true,
                opened: Mutex::new(Vec::new()),
            })
        }

        fn opened(&self) -> Vec<String> {
            self.opened.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ConfirmationSurface for StubSurface {
        async fn open_window(&self, _tab_id: i64, url: &str) -> anyhow::Result<()> {
            if self.fail_window {
                anyhow::bail!("window blocked");
            }
            self.opened.lock().unwrap().push(format!("window:{}", url));
            Ok(())
        }

        async fn open_tab(&self, url: &str) -> anyhow::Result<()> {
            self.opened.lock().unwrap().push(format!("tab:{}", url));
            Ok(())
        }
    }

    struct Harness {
        handle: EngineHandle,
        events: broadcast::Receiver<OutboundEvent>,
        client: Arc<StubClient>,
        surface: Arc<StubSurface>,
        _dir: tempfile::TempDir,
    }

    async fn harness(client: Arc<StubClient>) -> Harness {
        build_harness(client, Arc::new(StubSurface::default()), false, true).await
    }

    async fn build_harness(
        client: Arc<StubClient>,
        surface: Arc<StubSurface>,
        auto_approve: bool,
        provision_wallet: bool,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::for_tests(dir.path());
        config.auto_approve = auto_approve;

        let storage = Arc::new(Storage::open(dir.path()).await.unwrap());
        let wallet = Arc::new(WalletService::new(&config, storage.clone()).await.unwrap());
        if provision_wallet {
            wallet.create().await.unwrap();
        }
        let pipeline = Arc::new(PaymentPipeline::new(client.clone() as Arc<dyn ProtocolClient>));
        let receipts = Arc::new(ReceiptStore::new(storage));
        let (events_tx, events_rx) = broadcast::channel(32);

        let handle = Engine::spawn(
            config,
            wallet,
            pipeline,
            receipts,
            surface.clone(),
            events_tx,
        );
        Harness {
            handle,
            events: events_rx,
            client,
            surface,
            _dir: dir,
        }
    }

    fn settled_receipt() -> Value {
        json!({"receiptId": "rcpt_1", "proof": "0xsettled", "merchantId": "ozentti"})
    }

    fn price_header(amount: &str) -> String {
        STANDARD.encode(
            json!({
                "version": "0.1",
                "accepts": [{
                    "price": format!("${}", amount),
                    "payTo": "0x09b84e3a3140ecbd4eed8cf184126ab256b5a2a0",
                    "network": "eip155:84532"
                }],
                "resource": {"description": "Access to premium article"}
            })
            .to_string(),
        )
    }

    fn intercept(tab_id: i64, url: &str, header: Option<String>) -> Command {
        let mut headers = HashMap::new();
        if let Some(value) = header {
            headers.insert("payment-required".to_string(), value);
        }
        Command::ResponseObserved(InterceptNotice {
            tab_id,
            url: url.to_string(),
            method: Some("GET".to_string()),
            status_code: 402,
            request_id: Some("req-1".to_string()),
            headers,
        })
    }

    fn direct_request(tab_id: i64) -> RpcRequest {
        RpcRequest::PayDirect {
            tab_id,
            requirement: json!({
                "amount": "0.25",
                "asset": "USDC",
                "recipient": "0xdef",
                "chain": "eip155:84532",
                "nonce": "n-direct"
            }),
            url: "https://shop.example/download".to_string(),
            method: Some("GET".to_string()),
        }
    }

    #[tokio::test]
    async fn end_to_end_operator_payment() {
        let mut h = harness(StubClient::with_receipt(settled_receipt())).await;

        h.handle
            .notify(intercept(
                1,
                "https://shop.example/article",
                Some(price_header("1.00")),
            ))
            .await;

        let reply = h
            .handle
            .request(RpcRequest::GetLastEvent { tab_id: 1 })
            .await
            .unwrap();
        assert_eq!(reply["event"]["requirement"][0]["amount"], "1.00");
        assert_eq!(reply["event"]["requirement"][0]["asset"], "USDC");
        assert_eq!(reply["event"]["requirement"][0]["chain"], "base-sepolia");

        let reply = h
            .handle
            .request(RpcRequest::PayForTab { tab_id: 1 })
            .await
            .unwrap();
        assert_eq!(reply["receipt"]["amount"], "1.00");
        assert_eq!(reply["receipt"]["asset"], "USDC");
        assert_eq!(reply["data"]["content"], "unlocked");

        let reply = h.handle.request(RpcRequest::ListReceipts).await.unwrap();
        assert_eq!(reply["receipts"][0]["receiptId"], "rcpt_1");
        assert_eq!(reply["receipts"][0]["amount"], "1.00");

        match h.events.recv().await.unwrap() {
            OutboundEvent::PaymentStatus {
                tab_id, ok, receipt, ..
            } => {
                assert_eq!(tab_id, 1);
                assert!(ok);
                assert_eq!(receipt.unwrap().receipt_id, "rcpt_1");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn pay_without_event_or_usable_option_is_rejected() {
        let h = harness(StubClient::with_receipt(settled_receipt())).await;

        let error = h
            .handle
            .request(RpcRequest::PayForTab { tab_id: 9 })
            .await
            .unwrap_err();
        assert!(matches!(error, AgentError::MissingRequirement));

        // A 402 whose header does not decode still records an event, but
        // there is nothing to pay.
        h.handle
            .notify(intercept(9, "https://shop.example/x", Some("garbage".to_string())))
            .await;
        let reply = h
            .handle
            .request(RpcRequest::GetLastEvent { tab_id: 9 })
            .await
            .unwrap();
        assert!(reply["event"]["requirement"].is_null());

        let error = h
            .handle
            .request(RpcRequest::PayForTab { tab_id: 9 })
            .await
            .unwrap_err();
        assert!(matches!(error, AgentError::MissingRequirement));
        assert_eq!(h.client.calls(), 0);
    }

    #[tokio::test]
    async fn pay_requires_provisioned_wallet() {
        let h = build_harness(
            StubClient::with_receipt(settled_receipt()),
            Arc::new(StubSurface::default()),
            false,
            false,
        )
        .await;

        h.handle
            .notify(intercept(
                1,
                "https://shop.example/article",
                Some(price_header("1.00")),
            ))
            .await;
        let error = h
            .handle
            .request(RpcRequest::PayForTab { tab_id: 1 })
            .await
            .unwrap_err();
        assert!(matches!(error, AgentError::NoWallet));
        assert_eq!(h.client.calls(), 0);
    }

    #[tokio::test]
    async fn cooldown_blocks_rapid_retry() {
        let h = harness(StubClient::with_receipt(settled_receipt())).await;

        h.handle
            .notify(intercept(
                1,
                "https://shop.example/article",
                Some(price_header("1.00")),
            ))
            .await;

        h.handle
            .request(RpcRequest::PayForTab { tab_id: 1 })
            .await
            .unwrap();
        let error = h
            .handle
            .request(RpcRequest::PayForTab { tab_id: 1 })
            .await
            .unwrap_err();
        assert!(matches!(error, AgentError::CooldownActive(_)));
        assert_eq!(h.client.calls(), 1);
    }

    #[tokio::test]
    async fn direct_flow_parks_confirms_and_settles() {
        let mut h = harness(StubClient::with_receipt(settled_receipt())).await;

        let reply = h.handle.request(direct_request(3)).await.unwrap();
        assert_eq!(reply["pending"], true);

        let reply = h
            .handle
            .request(RpcRequest::GetPendingPayment { tab_id: 3 })
            .await
            .unwrap();
        assert_eq!(reply["pending"]["amount"], "0.25");
        assert_eq!(reply["pending"]["recipient"], "0xdef");

        let reply = h
            .handle
            .request(RpcRequest::ConfirmPendingPayment { tab_id: 3 })
            .await
            .unwrap();
        assert_eq!(reply["receipt"]["amount"], "0.25");

        let reply = h
            .handle
            .request(RpcRequest::GetPendingPayment { tab_id: 3 })
            .await
            .unwrap();
        assert!(reply["pending"].is_null());

        assert!(h
            .surface
            .opened()
            .iter()
            .any(|o| o == "window:veyrun://confirm?tabId=3"));

        match h.events.recv().await.unwrap() {
            OutboundEvent::PaymentStatus { tab_id, ok, .. } => {
                assert_eq!(tab_id, 3);
                assert!(ok);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn confirm_is_not_reentrant() {
        let h = harness(StubClient::with_receipt(settled_receipt())).await;

        h.handle.request(direct_request(4)).await.unwrap();

        let (a, b) = tokio::join!(
            h.handle
                .request(RpcRequest::ConfirmPendingPayment { tab_id: 4 }),
            h.handle
                .request(RpcRequest::ConfirmPendingPayment { tab_id: 4 }),
        );
        let outcomes = [a, b];
        assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|o| matches!(o, Err(AgentError::NoPendingPayment))));
        assert_eq!(h.client.calls(), 1);
    }

    #[tokio::test]
    async fn second_direct_request_overwrites_the_first() {
        let h = harness(StubClient::with_receipt(settled_receipt())).await;

        h.handle.request(direct_request(5)).await.unwrap();
        let mut second = direct_request(5);
        if let RpcRequest::PayDirect { requirement, .. } = &mut second {
            requirement["amount"] = json!("9.99");
        }
        h.handle.request(second).await.unwrap();

        let reply = h
            .handle
            .request(RpcRequest::GetPendingPayment { tab_id: 5 })
            .await
            .unwrap();
        assert_eq!(reply["pending"]["amount"], "9.99");
    }

    #[tokio::test]
    async fn tab_close_purges_event_and_pending() {
        let h = harness(StubClient::with_receipt(settled_receipt())).await;

        h.handle
            .notify(intercept(
                6,
                "https://shop.example/article",
                Some(price_header("1.00")),
            ))
            .await;
        h.handle.request(direct_request(6)).await.unwrap();

        h.handle.notify(Command::TabClosed { tab_id: 6 }).await;

        let reply = h
            .handle
            .request(RpcRequest::GetLastEvent { tab_id: 6 })
            .await
            .unwrap();
        assert!(reply["event"].is_null());

        let reply = h
            .handle
            .request(RpcRequest::GetPendingPayment { tab_id: 6 })
            .await
            .unwrap();
        assert!(reply["pending"].is_null());

        let error = h
            .handle
            .request(RpcRequest::ConfirmPendingPayment { tab_id: 6 })
            .await
            .unwrap_err();
        assert!(matches!(error, AgentError::NoPendingPayment));
    }

    #[tokio::test]
    async fn auto_approve_settles_direct_requests_immediately() {
        let h = build_harness(
            StubClient::with_receipt(settled_receipt()),
            Arc::new(StubSurface::default()),
            true,
            true,
        )
        .await;

        let reply = h.handle.request(direct_request(7)).await.unwrap();
        assert!(reply["pending"].is_null());
        assert_eq!(reply["receipt"]["amount"], "0.25");
        assert_eq!(h.client.calls(), 1);
        assert!(h.surface.opened().is_empty());
    }

    #[tokio::test]
    async fn blocked_confirmation_window_falls_back_to_tab() {
        let h = build_harness(
            StubClient::with_receipt(settled_receipt()),
            StubSurface::blocked(),
            false,
            true,
        )
        .await;

        h.handle.request(direct_request(8)).await.unwrap();

        // The surface leg is spawned; give it a moment to run.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let opened = h.surface.opened();
        assert_eq!(opened, vec!["tab:veyrun://confirm?tabId=8".to_string()]);
    }

    #[tokio::test]
    async fn insufficiency_is_broadcast_distinctly() {
        let mut h = harness(StubClient::failing("Insufficient USDC balance: 0 < 0.25")).await;

        h.handle.request(direct_request(10)).await.unwrap();
        let error = h
            .handle
            .request(RpcRequest::ConfirmPendingPayment { tab_id: 10 })
            .await
            .unwrap_err();
        assert!(error.is_insufficient());

        match h.events.recv().await.unwrap() {
            OutboundEvent::PaymentStatus {
                ok, insufficient, ..
            } => {
                assert!(!ok);
                assert_eq!(insufficient, Some(true));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn simulated_receipts_are_returned_but_never_persisted() {
        let h = harness(StubClient::with_receipt(
            json!({"receiptId": "rcpt_demo", "amount": "0.25", "proof": MOCK_PROOF}),
        ))
        .await;

        h.handle
            .notify(intercept(
                11,
                "https://shop.example/article",
                Some(price_header("0.25")),
            ))
            .await;
        let reply = h
            .handle
            .request(RpcRequest::PayForTab { tab_id: 11 })
            .await
            .unwrap();
        assert_eq!(reply["receipt"]["proof"], MOCK_PROOF);

        let reply = h.handle.request(RpcRequest::ListReceipts).await.unwrap();
        assert_eq!(reply["receipts"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn badge_follows_active_tab_and_fresh_events() {
        let mut h = harness(StubClient::with_receipt(settled_receipt())).await;

        h.handle.notify(Command::TabActivated { tab_id: 1 }).await;
        match h.events.recv().await.unwrap() {
            OutboundEvent::Badge { tab_id, text } => {
                assert_eq!(tab_id, 1);
                assert_eq!(text, "");
            }
            other => panic!("unexpected event: {:?}", other),
        }

        h.handle
            .notify(intercept(
                1,
                "https://shop.example/article",
                Some(price_header("1.00")),
            ))
            .await;
        match h.events.recv().await.unwrap() {
            OutboundEvent::Badge { tab_id, text } => {
                assert_eq!(tab_id, 1);
                assert_eq!(text, "402");
            }
            other => panic!("unexpected event: {:?}", other),
        }

        // A 402 on a background tab does not repaint the badge.
        h.handle
            .notify(intercept(
                2,
                "https://shop.example/other",
                Some(price_header("1.00")),
            ))
            .await;
        h.handle.request(RpcRequest::Ping).await.unwrap();
        assert!(matches!(
            h.events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn status_and_diagnostics() {
        let h = harness(StubClient::with_receipt(settled_receipt())).await;

        h.handle.request(RpcRequest::Ping).await.unwrap();
        let reply = h.handle.request(RpcRequest::GetStatus).await.unwrap();
        assert_eq!(reply["headerName"], "Payment-Required");
        assert!(!reply["lastPingAt"].is_null());

        let reply = h
            .handle
            .request(RpcRequest::DecodeHeader {
                value: price_header("0.25"),
            })
            .await
            .unwrap();
        assert_eq!(reply["parsed"]["requirements"][0]["amount"], "0.25");

        let reply = h
            .handle
            .request(RpcRequest::DecodeHeader {
                value: "garbage".to_string(),
            })
            .await
            .unwrap();
        assert!(reply["parsed"].is_null());

        let reply = h.handle.request(RpcRequest::ChainInfo).await.unwrap();
        assert_eq!(reply["chain"]["name"], "Base Sepolia");
        assert_eq!(reply["chain"]["id"], 84532);

        let reply = h.handle.request(RpcRequest::WalletStatus).await.unwrap();
        assert_eq!(reply["hasWallet"], true);
        let address = reply["address"].as_str().unwrap().to_string();

        let reply = h.handle.request(RpcRequest::OpenTopup).await.unwrap();
        let url = reply["url"].as_str().unwrap();
        assert!(url.contains(&address));

        let reply = h.handle.request(RpcRequest::ExportKey).await.unwrap();
        assert_eq!(reply["privateKey"].as_str().unwrap().len(), 66);
    }
}
