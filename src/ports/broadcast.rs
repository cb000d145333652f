//! Status broadcast port
//!
//! Fire-and-forget: the registry logs and drops any error returned here.

use crate::domain::{ModemResult, StatusUpdate};

pub trait StatusBroadcaster: Send + Sync {
    fn publish(&self, update: &StatusUpdate) -> ModemResult<()>;
}
