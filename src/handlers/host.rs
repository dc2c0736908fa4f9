use crate::engine::{Command, EngineHandle};
use crate::models::{InterceptNotice, TabEventKind, TabNotice};
use axum::{extract::State, Json};
use serde_json::{json, Value};

/// Called by the host's network layer for every observed response. The
/// engine filters for 402s; the reply does not wait for processing.
pub async fn intercept(
    State(engine): State<EngineHandle>,
    Json(notice): Json<InterceptNotice>,
) -> Json<Value> {
    engine.notify(Command::ResponseObserved(notice)).await;
    Json(json!({"ok": true}))
}

/// Tab lifecycle notifications from the host.
pub async fn tab_event(
    State(engine): State<EngineHandle>,
    Json(notice): Json<TabNotice>,
) -> Json<Value> {
    let command = match notice.event {
        TabEventKind::Closed => Command::TabClosed {
            tab_id: notice.tab_id,
        },
        TabEventKind::Activated => Command::TabActivated {
            tab_id: notice.tab_id,
        },
    };
    engine.notify(command).await;
    Json(json!({"ok": true}))
}
