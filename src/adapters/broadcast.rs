//! Status broadcasters
//!
//! The engine pushes a `StatusUpdate` on every transition. Which transport
//! carries it further (UI events, a web socket, ...) is up to the host;
//! these are the two the crate ships with.

use crossbeam_channel::{Receiver, Sender};

use crate::domain::{ModemError, ModemResult, StatusUpdate};
use crate::ports::StatusBroadcaster;

/// Logs every update as one JSON line at INFO
pub struct LogBroadcaster;

impl StatusBroadcaster for LogBroadcaster {
    fn publish(&self, update: &StatusUpdate) -> ModemResult<()> {
        log::info!("status {}", status_json(update)?);
        Ok(())
    }
}

fn status_json(update: &StatusUpdate) -> ModemResult<String> {
    serde_json::to_string(update)
        .map_err(|e| ModemError::Broadcast(format!("cannot serialize status: {e}")))
}

/// Forwards updates to a crossbeam channel
pub struct ChannelBroadcaster {
    tx: Sender<StatusUpdate>,
}

impl ChannelBroadcaster {
    /// Broadcaster plus the receiving end of its (unbounded) channel
    pub fn channel() -> (Self, Receiver<StatusUpdate>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx }, rx)
    }
}

impl StatusBroadcaster for ChannelBroadcaster {
    fn publish(&self, update: &StatusUpdate) -> ModemResult<()> {
        // A dropped receiver is not the engine's problem
        let _ = self.tx.send(update.clone());
        Ok(())
    }
}
