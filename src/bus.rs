use crate::document::DocumentEvent;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    /// A document was written to a path that held nothing before
    DocumentCreated(DocumentEvent),
}

#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: Event) {
        // We ignore the error if there are no receivers
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentPath, Fields};

    #[tokio::test]
    async fn subscribers_see_published_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        let path = DocumentPath::parse("products/p1").unwrap();
        bus.publish(Event::DocumentCreated(DocumentEvent::new(
            path.clone(),
            Fields::new(),
        )));

        let Event::DocumentCreated(event) = rx.recv().await.unwrap();
        assert_eq!(event.path, path);
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        let bus = EventBus::new(0);
        bus.publish(Event::DocumentCreated(DocumentEvent::new(
            DocumentPath::parse("products/p1").unwrap(),
            Fields::new(),
        )));
    }
}
