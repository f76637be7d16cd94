use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use {
    chrono::{DateTime, Utc},
    serde_json::{Value, json},
    tokio::sync::{RwLock, mpsc},
    tracing::debug,
};

/// A realtime client currently connected to the gateway.
#[derive(Debug)]
pub struct RealtimeSession {
    pub id: String,
    pub connected_at: DateTime<Utc>,
    /// Channel feeding this client's write loop.
    sender: mpsc::UnboundedSender<String>,
}

impl RealtimeSession {
    pub fn new(id: impl Into<String>, sender: mpsc::UnboundedSender<String>) -> Self {
        Self {
            id: id.into(),
            connected_at: Utc::now(),
            sender,
        }
    }

    /// Send a serialized frame. Returns `false` once the write loop is gone.
    pub fn send(&self, frame: &str) -> bool {
        self.sender.send(frame.to_string()).is_ok()
    }
}

/// Connection bookkeeping for realtime sessions. Knows nothing about HTTP
/// requests, authentication or payloads.
#[derive(Debug, Default)]
pub struct RealtimeRegistry {
    sessions: RwLock<HashMap<String, RealtimeSession>>,
    seq: AtomicU64,
}

impl RealtimeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn on_connect(&self, session: RealtimeSession) {
        let id = session.id.clone();
        let replaced = self.sessions.write().await.insert(id.clone(), session);
        if replaced.is_some() {
            debug!(session_id = %id, "replaced existing realtime session");
        }
    }

    /// Remove a session. Unknown or already-removed ids are a no-op.
    pub async fn on_disconnect(&self, id: &str) -> Option<RealtimeSession> {
        self.sessions.write().await.remove(id)
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Push an event frame to every session. Returns how many accepted it.
    pub async fn broadcast(&self, event: &str, payload: Value) -> usize {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let frame = json!({
            "type": "event",
            "event": event,
            "payload": payload,
            "seq": seq,
        })
        .to_string();

        let sessions = self.sessions.read().await;
        let delivered = sessions.values().filter(|s| s.send(&frame)).count();
        debug!(event, seq, delivered, "broadcast");
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: &str) -> (RealtimeSession, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (RealtimeSession::new(id, tx), rx)
    }

    #[tokio::test]
    async fn double_disconnect_is_noop() {
        let registry = RealtimeRegistry::new();
        let (s1, _rx) = session("s1");
        registry.on_connect(s1).await;
        assert_eq!(registry.count().await, 1);

        assert!(registry.on_disconnect("s1").await.is_some());
        assert_eq!(registry.count().await, 0);

        assert!(registry.on_disconnect("s1").await.is_none());
        assert_eq!(registry.count().await, 0);
    }

    #[test]
    fn session_records_wall_clock_connect_time() {
        let before = Utc::now();
        let (s, _rx) = session("s1");
        assert!(s.connected_at >= before);
        assert!(s.connected_at <= Utc::now());
    }

    #[tokio::test]
    async fn unknown_disconnect_leaves_others() {
        let registry = RealtimeRegistry::new();
        let (a, _ra) = session("a");
        let (b, _rb) = session("b");
        registry.on_connect(a).await;
        registry.on_connect(b).await;

        assert!(registry.on_disconnect("zzz").await.is_none());
        assert_eq!(registry.session_ids().await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn reconnect_with_same_id_keeps_one_entry() {
        let registry = RealtimeRegistry::new();
        let (first, _r1) = session("s1");
        let (second, _r2) = session("s1");
        registry.on_connect(first).await;
        registry.on_connect(second).await;
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn broadcast_reaches_live_sessions() {
        let registry = RealtimeRegistry::new();
        let (a, mut ra) = session("a");
        let (b, rb) = session("b");
        registry.on_connect(a).await;
        registry.on_connect(b).await;
        drop(rb);

        let delivered = registry
            .broadcast("deal.published", json!({ "dealId": 7 }))
            .await;
        assert_eq!(delivered, 1);

        let frame: Value = serde_json::from_str(&ra.recv().await.unwrap()).unwrap();
        assert_eq!(frame["type"], "event");
        assert_eq!(frame["event"], "deal.published");
        assert_eq!(frame["payload"]["dealId"], 7);
        assert_eq!(frame["seq"], 1);
    }
}
