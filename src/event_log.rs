// src/event_log.rs
// C2: per-session append-only buffer of protocol events with resumable
// replay (spec.md §4.2).

use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct EventRecord {
    event_id: String,
    ts: Instant,
    payload: Value,
}

struct Stream {
    next_seq: u64,
    events: Vec<EventRecord>,
    index: HashMap<String, usize>,
}

impl Stream {
    fn new() -> Self {
        Self { next_seq: 1, events: Vec::new(), index: HashMap::new() }
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for (pos, record) in self.events.iter().enumerate() {
            self.index.insert(record.event_id.clone(), pos);
        }
    }

    /// Drop events older than `ttl` and trim the head down to `cap`
    /// entries. Rebuilds the position index only when something was
    /// actually dropped.
    fn prune(&mut self, ttl: Duration, cap: usize, now: Instant) {
        let before = self.events.len();
        self.events.retain(|e| now.duration_since(e.ts) <= ttl);
        if self.events.len() > cap {
            let excess = self.events.len() - cap;
            self.events.drain(0..excess);
        }
        if self.events.len() != before {
            self.rebuild_index();
        }
    }
}

/// Per-session event log. TTL and cap apply per-stream; a session in this
/// bridge only ever has one stream, but the abstraction stays general.
pub struct EventLog {
    ttl: Duration,
    cap: usize,
    streams: Mutex<HashMap<String, Stream>>,
}

impl EventLog {
    pub fn new(ttl: Duration, cap: usize) -> Self {
        Self { ttl, cap, streams: Mutex::new(HashMap::new()) }
    }

    pub fn with_defaults() -> Self {
        Self::new(Duration::from_secs(15 * 60), 5000)
    }

    /// Append `payload` to `stream_id`'s buffer, returning its `event_id`.
    pub async fn store(&self, stream_id: &str, payload: Value) -> String {
        let now = Instant::now();
        let mut streams = self.streams.lock().await;
        let stream = streams.entry(stream_id.to_string()).or_insert_with(Stream::new);

        stream.prune(self.ttl, self.cap, now);

        let seq = stream.next_seq;
        stream.next_seq += 1;
        let event_id = format!("{stream_id}:{seq}");
        let pos = stream.events.len();
        stream.events.push(EventRecord { event_id: event_id.clone(), ts: now, payload });
        stream.index.insert(event_id.clone(), pos);
        event_id
    }

    /// Replay every event strictly after `last_event_id`, awaiting each
    /// `send` call in order. Returns the stream id that was replayed, or
    /// `None` if no replay was possible (empty id, unknown stream, or the
    /// anchor has been pruned).
    pub async fn replay_after<F, Fut>(&self, last_event_id: &str, mut send: F) -> Option<String>
    where
        F: FnMut(Value) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        if last_event_id.is_empty() {
            return None;
        }
        let (stream_id, _) = last_event_id.split_once(':')?;
        let stream_id = stream_id.to_string();

        let now = Instant::now();
        let to_send: Vec<Value> = {
            let mut streams = self.streams.lock().await;
            let stream = streams.get_mut(&stream_id)?;
            stream.prune(self.ttl, self.cap, now);

            let anchor_pos = *stream.index.get(last_event_id)?;
            stream.events[(anchor_pos + 1)..].iter().map(|e| e.payload.clone()).collect()
        };

        for payload in to_send {
            send(payload).await;
        }
        Some(stream_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn event_ids_are_monotonic_per_stream() {
        let log = EventLog::with_defaults();
        let id1 = log.store("s1", json!({"n": 1})).await;
        let id2 = log.store("s1", json!({"n": 2})).await;
        assert_eq!(id1, "s1:1");
        assert_eq!(id2, "s1:2");
    }

    #[tokio::test]
    async fn replay_after_delivers_in_order() {
        let log = EventLog::with_defaults();
        for n in 1..=7 {
            log.store("s1", json!({"n": n})).await;
        }
        let mut received = Vec::new();
        let stream = log
            .replay_after("s1:4", |payload| {
                received.push(payload);
                async {}
            })
            .await;
        assert_eq!(stream.as_deref(), Some("s1"));
        assert_eq!(received, vec![json!({"n": 5}), json!({"n": 6}), json!({"n": 7})]);
    }

    #[tokio::test]
    async fn empty_last_event_id_yields_no_replay() {
        let log = EventLog::with_defaults();
        log.store("s1", json!({"n": 1})).await;
        let result = log.replay_after("", |_| async {}).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn unknown_stream_yields_no_replay() {
        let log = EventLog::with_defaults();
        let result = log.replay_after("missing:3", |_| async {}).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn pruned_anchor_yields_no_replay() {
        let log = EventLog::new(Duration::from_secs(15 * 60), 3);
        for n in 1..=5 {
            log.store("s1", json!({"n": n})).await;
        }
        // s1:1 and s1:2 should have been trimmed by the cap of 3.
        let result = log.replay_after("s1:1", |_| async {}).await;
        assert!(result.is_none());
    }
}
