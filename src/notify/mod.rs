//! Sensor update notifications
//!
//! Published once per completed poll cycle. Events carry no payload:
//! subscribers re-read current state from the account controller.

use tokio::sync::broadcast::{self, error::RecvError};

/// Buffered events per subscriber before the slowest one starts lagging
const CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorsUpdated;

#[derive(Clone)]
pub struct UpdateNotifier {
    sender: broadcast::Sender<SensorsUpdated>,
}

impl UpdateNotifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SensorsUpdated> {
        self.sender.subscribe()
    }

    /// Fire and forget; returns how many subscribers were reached.
    pub fn notify(&self) -> usize {
        self.sender.send(SensorsUpdated).unwrap_or(0)
    }
}

/// Wait for the next event. A lagging receiver skips the missed events and
/// keeps listening; returns false once the notifier is gone.
pub async fn next_update(updates: &mut broadcast::Receiver<SensorsUpdated>) -> bool {
    loop {
        match updates.recv().await {
            Ok(SensorsUpdated) => return true,
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!("[Notify] Subscriber lagged, skipped {} updates", skipped)
            }
            Err(RecvError::Closed) => return false,
        }
    }
}

impl Default for UpdateNotifier {
    fn default() -> Self {
        Self::new()
    }
}
