use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc;

/// Per-subscriber queue bound. A subscriber that falls this far behind
/// starts losing events instead of slowing anyone else down.
pub const SUBSCRIBER_QUEUE_CAP: usize = 10;

/// Fan-out of pre-encoded JSON events to SSE subscribers. The producer
/// encodes once; each subscriber holds a bounded queue and is dropped from
/// the registry when its receiver goes away.
#[derive(Default)]
pub struct SseBroadcaster {
    subscribers: Mutex<Vec<mpsc::Sender<Arc<String>>>>,
    last: Mutex<Option<Arc<String>>>,
}

impl SseBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber and hand back its queue along with the last
    /// published event for an initial snapshot.
    pub fn subscribe(&self) -> (Option<Arc<String>>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAP);
        let snapshot = self.last.lock().expect("sse last poisoned").clone();
        self.subscribers
            .lock()
            .expect("sse registry poisoned")
            .push(tx);
        (snapshot, rx)
    }

    pub fn publish_json<T: Serialize>(&self, value: &T) {
        match serde_json::to_string(value) {
            Ok(json) => self.publish_text(json),
            Err(why) => log::warn!("[sse] failed to encode event: {why}"),
        }
    }

    /// Non-blocking broadcast. Full queues drop this event for that
    /// subscriber only; closed queues are removed.
    pub fn publish_text(&self, json: String) {
        let frame = Arc::new(json);
        *self.last.lock().expect("sse last poisoned") = Some(frame.clone());

        let mut subscribers = self.subscribers.lock().expect("sse registry poisoned");
        subscribers.retain(|tx| match tx.try_send(frame.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("sse registry poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "current_thread")]
    async fn slow_subscriber_does_not_stall_fast_one() {
        let broadcaster = Arc::new(SseBroadcaster::new());

        // The slow subscriber never drains its queue.
        let (_, slow_rx) = broadcaster.subscribe();
        let (_, mut fast_rx) = broadcaster.subscribe();

        let collector = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(frame) = fast_rx.recv().await {
                if frame.as_str() == "\"done\"" {
                    break;
                }
                seen.push(frame.as_str().to_owned());
            }
            seen
        });

        for i in 0..1000u32 {
            broadcaster.publish_json(&i);
            // Let the single-threaded runtime hand the frame to the fast
            // subscriber before the next publish.
            tokio::task::yield_now().await;
        }
        broadcaster.publish_json(&"done");

        let seen = collector.await.unwrap();
        assert_eq!(seen.len(), 1000);
        for (i, frame) in seen.iter().enumerate() {
            assert_eq!(frame, &i.to_string());
        }

        // The slow subscriber's queue stayed bounded.
        assert!(slow_rx.len() <= SUBSCRIBER_QUEUE_CAP);
        assert_eq!(broadcaster.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn disconnected_subscribers_are_pruned() {
        let broadcaster = SseBroadcaster::new();
        let (_, rx) = broadcaster.subscribe();
        drop(rx);
        broadcaster.publish_json(&1);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn new_subscriber_gets_last_event_as_snapshot() {
        let broadcaster = SseBroadcaster::new();
        broadcaster.publish_json(&serde_json::json!({"tick": 1}));
        let (snapshot, _rx) = broadcaster.subscribe();
        assert_eq!(snapshot.unwrap().as_str(), r#"{"tick":1}"#);
    }
}
