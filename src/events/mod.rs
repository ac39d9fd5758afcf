// events/mod.rs
use tokio::sync::broadcast;
use tracing::trace;

use crate::models::DeviceEvent;

const CAPACITY: usize = 100;

/// Fans device events out to every subscriber. Slow subscribers lag and
/// lose the oldest events rather than blocking publishers.
pub struct EventBus {
    sender: broadcast::Sender<DeviceEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, event: DeviceEvent) {
        // No subscribers is not an error.
        if let Ok(receivers) = self.sender.send(event) {
            trace!(receivers, "Published device event");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
