//! Turn-scoped event collector. The agent loop emits into a [`TurnTrace`];
//! the transport layer decides whether the events are buffered into the final
//! JSON response or additionally flushed live over an SSE channel. The loop
//! itself never knows whether it is streaming.

use aidesk_protocol::TurnEvent;
use tokio::sync::mpsc;
use tracing::warn;

pub struct TurnTrace {
    events: Vec<TurnEvent>,
    live: Option<mpsc::Sender<TurnEvent>>,
}

impl TurnTrace {
    pub fn buffered() -> Self {
        Self {
            events: Vec::new(),
            live: None,
        }
    }

    pub fn streaming(tx: mpsc::Sender<TurnEvent>) -> Self {
        Self {
            events: Vec::new(),
            live: Some(tx),
        }
    }

    /// Records the event and forwards it to the live channel if one is
    /// attached. A closed channel (client went away) is not an error here;
    /// cancellation is signalled separately.
    pub async fn emit(&mut self, event: TurnEvent) {
        if let Some(tx) = &self.live {
            if let Err(e) = tx.send(event.clone()).await {
                warn!("failed to flush live event: {e}");
                self.live = None;
            }
        }
        self.events.push(event);
    }

    pub fn events(&self) -> &[TurnEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<TurnEvent> {
        self.events
    }

    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string(&self.events)?)
    }
}
