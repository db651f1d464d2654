use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::types::TimerRecord;

/// Per-subscriber channel capacity. A consumer that falls this far behind
/// starts missing records rather than stalling the dispatch loop.
const SUBSCRIBER_BUFFER: usize = 64;

/// Named-event fan-out for timer completions.
///
/// Consumers subscribe to a completion tag (e.g. `"mute_complete"`) and
/// receive every fired [`TimerRecord`] published under it. Delivery is
/// non-blocking (`try_send`), so a slow or panicking consumer can never
/// stall or crash the dispatch loop — the channel is the isolation
/// boundary.
#[derive(Default)]
pub struct CompletionBus {
    subscribers: DashMap<String, Vec<mpsc::Sender<TimerRecord>>>,
}

impl CompletionBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a completion tag. The receiver yields fired records
    /// until the bus is dropped; dropping the receiver unsubscribes.
    pub fn subscribe(&self, tag: &str) -> mpsc::Receiver<TimerRecord> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.subscribers.entry(tag.to_string()).or_default().push(tx);
        debug!(%tag, "completion subscriber registered");
        rx
    }

    /// Publish a fired timer under its `"{event}_complete"` tag.
    ///
    /// Closed subscribers are pruned; a full subscriber misses this record
    /// and a warning is logged.
    pub fn publish(&self, record: &TimerRecord) {
        let tag = record.completion_tag();
        let Some(mut entry) = self.subscribers.get_mut(&tag) else {
            debug!(%tag, "timer fired with no subscribers");
            return;
        };

        entry.retain(|tx| !tx.is_closed());
        for tx in entry.iter() {
            if tx.try_send(record.clone()).is_err() {
                warn!(%tag, "completion subscriber not keeping up — record dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::{json, Map};

    fn fired_record(event: &str) -> TimerRecord {
        TimerRecord::ephemeral(Utc::now(), event, vec![json!(1)], Map::new(), None)
    }

    #[tokio::test]
    async fn subscriber_receives_matching_tag_only() {
        let bus = CompletionBus::new();
        let mut mute_rx = bus.subscribe("mute_complete");
        let mut reminder_rx = bus.subscribe("reminder_complete");

        bus.publish(&fired_record("mute"));

        let got = mute_rx.recv().await.expect("channel closed");
        assert_eq!(got.event, "mute");
        assert!(reminder_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn every_subscriber_gets_a_copy() {
        let bus = CompletionBus::new();
        let mut a = bus.subscribe("mute_complete");
        let mut b = bus.subscribe("mute_complete");

        bus.publish(&fired_record("mute"));

        assert!(a.recv().await.is_some());
        assert!(b.recv().await.is_some());
    }

    #[tokio::test]
    async fn dropped_subscriber_is_pruned() {
        let bus = CompletionBus::new();
        let rx = bus.subscribe("mute_complete");
        drop(rx);

        // Must not panic or error; the dead channel is simply removed.
        bus.publish(&fired_record("mute"));
        assert!(bus
            .subscribers
            .get("mute_complete")
            .expect("entry missing")
            .is_empty());
    }
}
