use crate::models::ReceiptRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inbound request on the message surface, one variant per message kind.
/// Mirrors the tagged `{type: ...}` messages UI surfaces send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RpcRequest {
    Ping,
    GetStatus,
    #[serde(rename_all = "camelCase")]
    GetLastEvent { tab_id: i64 },
    DecodeHeader { value: String },
    WalletStatus,
    CreateWallet,
    #[serde(rename_all = "camelCase")]
    ImportWallet { private_key: String },
    ExportKey,
    SignPayload { payload: String },
    ChainInfo,
    GetBalance,
    #[serde(rename_all = "camelCase")]
    PayForTab { tab_id: i64 },
    #[serde(rename_all = "camelCase")]
    PayDirect {
        tab_id: i64,
        requirement: Value,
        url: String,
        #[serde(default)]
        method: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    GetPendingPayment { tab_id: i64 },
    #[serde(rename_all = "camelCase")]
    ConfirmPendingPayment { tab_id: i64 },
    #[serde(rename_all = "camelCase")]
    CancelPendingPayment { tab_id: i64 },
    ListReceipts,
    OpenTopup,
}

/// Host notification for an observed network response. The engine filters
/// for 402s itself; the interceptor forwards everything.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterceptNotice {
    pub tab_id: i64,
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    pub status_code: u16,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub headers: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TabEventKind {
    Closed,
    Activated,
}

/// Host notification for tab lifecycle changes.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabNotice {
    pub event: TabEventKind,
    pub tab_id: i64,
}

/// Event fanned out to every listening surface over the event socket.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutboundEvent {
    #[serde(rename_all = "camelCase")]
    PaymentStatus {
        tab_id: i64,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        receipt: Option<ReceiptRecord>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        insufficient: Option<bool>,
    },
    #[serde(rename_all = "camelCase")]
    Badge { tab_id: i64, text: String },
    #[serde(rename_all = "camelCase")]
    OpenConfirm { tab_id: i64, url: String },
    #[serde(rename_all = "camelCase")]
    OpenTab { url: String },
}

#[derive(Serialize, Deserialize, Debug)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub wallet: bool,
    pub rpc: bool,
    pub uptime_seconds: u64,
    pub timestamp: DateTime<Utc>,
}
