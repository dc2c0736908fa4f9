use crate::engine::{EngineHandle, MsgResult};
use crate::models::RpcRequest;
use axum::{extract::State, Json};
use serde_json::{json, Value};

/// The request/response message surface. Every reply is `{ok:true, ...}`
/// or `{ok:false, error}`, regardless of how long the engine defers it.
pub async fn message(
    State(engine): State<EngineHandle>,
    Json(request): Json<RpcRequest>,
) -> Json<Value> {
    let result = engine.request(request).await;
    Json(envelope(result))
}

pub fn envelope(result: MsgResult) -> Value {
    match result {
        Ok(Value::Object(mut payload)) => {
            payload.insert("ok".to_string(), Value::Bool(true));
            Value::Object(payload)
        }
        Ok(other) => json!({"ok": true, "data": other}),
        Err(error) => {
            let mut body = json!({"ok": false, "error": error.to_string()});
            if error.is_insufficient() {
                body["insufficient"] = Value::Bool(true);
            }
            body
        }
    }
}
