use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;

use crate::sse::SseBroadcaster;

/// How many outbound calls the replay buffer retains.
pub const API_LOG_CAP: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct ApiCall {
    pub ts_ms: i64,
    pub method: String,
    pub url: String,
    pub status: u16,
}

/// Append-log of outbound upstream requests. New stream subscribers replay
/// the bounded history before entering live mode.
pub struct ApiCallLog {
    history: Mutex<VecDeque<ApiCall>>,
    broadcaster: SseBroadcaster,
}

impl Default for ApiCallLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ApiCallLog {
    pub fn new() -> Self {
        Self {
            history: Mutex::new(VecDeque::with_capacity(API_LOG_CAP)),
            broadcaster: SseBroadcaster::new(),
        }
    }

    pub fn record(&self, method: &str, url: &str, status: u16) {
        let call = ApiCall {
            ts_ms: Utc::now().timestamp_millis(),
            method: method.to_owned(),
            url: url.to_owned(),
            status,
        };
        {
            let mut history = self.history.lock().expect("api log poisoned");
            if history.len() == API_LOG_CAP {
                history.pop_front();
            }
            history.push_back(call.clone());
        }
        self.broadcaster.publish_json(&call);
    }

    pub fn history(&self) -> Vec<ApiCall> {
        self.history
            .lock()
            .expect("api log poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// History snapshot plus a live queue, for SSE handlers.
    pub fn subscribe(
        &self,
    ) -> (
        Vec<ApiCall>,
        tokio::sync::mpsc::Receiver<Arc<String>>,
    ) {
        let history = self.history();
        let (_, rx) = self.broadcaster.subscribe();
        (history, rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn history_is_bounded() {
        let log = ApiCallLog::new();
        for i in 0..150 {
            log.record("GET", &format!("https://upstream/{i}"), 200);
        }
        let history = log.history();
        assert_eq!(history.len(), API_LOG_CAP);
        assert_eq!(history[0].url, "https://upstream/50");
        assert_eq!(history.last().unwrap().url, "https://upstream/149");
    }

    #[tokio::test]
    async fn subscriber_replays_then_receives_live() {
        let log = ApiCallLog::new();
        log.record("GET", "https://upstream/a", 200);

        let (history, mut rx) = log.subscribe();
        assert_eq!(history.len(), 1);

        log.record("GET", "https://upstream/b", 500);
        let frame = rx.recv().await.unwrap();
        assert!(frame.contains("https://upstream/b"));
        assert!(frame.contains("500"));
    }
}
