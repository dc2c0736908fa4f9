use crate::models::OutboundEvent;
use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Opens the confirmation UI for a pending payment. The host owns actual
/// window management; the engine only asks.
#[async_trait]
pub trait ConfirmationSurface: Send + Sync {
    /// Opens a dedicated confirmation window next to the requesting tab.
    async fn open_window(&self, tab_id: i64, url: &str) -> Result<()>;

    /// Fallback: opens the same target as a regular tab.
    async fn open_tab(&self, url: &str) -> Result<()>;
}

/// Surface that instructs connected UI listeners over the event socket.
/// With nobody listening the window cannot open, which callers treat as
/// the fallback trigger.
pub struct BroadcastSurface {
    events: broadcast::Sender<OutboundEvent>,
}

impl BroadcastSurface {
    pub fn new(events: broadcast::Sender<OutboundEvent>) -> Self {
        Self { events }
    }
}

#[async_trait]
impl ConfirmationSurface for BroadcastSurface {
    async fn open_window(&self, tab_id: i64, url: &str) -> Result<()> {
        if self.events.receiver_count() == 0 {
            bail!("no surface listeners connected");
        }
        let _ = self.events.send(OutboundEvent::OpenConfirm {
            tab_id,
            url: url.to_string(),
        });
        Ok(())
    }

    async fn open_tab(&self, url: &str) -> Result<()> {
        let _ = self.events.send(OutboundEvent::OpenTab {
            url: url.to_string(),
        });
        Ok(())
    }
}
