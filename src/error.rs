use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("No wallet provisioned")]
    NoWallet,

    #[error("Payment attempt too soon for {0}")]
    CooldownActive(String),

    #[error("No payable requirement for this resource")]
    MissingRequirement,

    #[error("No pending payment")]
    NoPendingPayment,

    #[error("Unlock failed ({0})")]
    UnlockRejected(u16),

    #[error("Missing receipt")]
    MissingReceipt,

    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Payment failed: {0}")]
    Payment(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AgentError {
    /// Execution failures carry no structured insufficiency signal, so the
    /// detection is a text match on the error message.
    pub fn is_insufficient(&self) -> bool {
        if matches!(self, AgentError::InsufficientBalance(_)) {
            return true;
        }
        let text = self.to_string().to_lowercase();
        text.contains("insufficient") && (text.contains("balance") || text.contains("funds"))
    }

    /// Reclassify an execution failure whose message matches the
    /// insufficient-balance pattern, so surfaces can offer a top-up action
    /// instead of a retry.
    pub fn reclassified(self) -> Self {
        if !matches!(self, AgentError::InsufficientBalance(_)) && self.is_insufficient() {
            AgentError::InsufficientBalance(self.to_string())
        } else {
            self
        }
    }
}

impl IntoResponse for AgentError {
    fn into_response(self) -> Response {
        // The message surface answers failures in-band as {ok:false}; only
        // transport-level problems surface as HTTP errors.
        let status = match &self {
            AgentError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AgentError::Storage(_) | AgentError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::OK,
        };

        tracing::error!(error = ?self, "request failed");

        let body = json!({
            "ok": false,
            "error": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}
