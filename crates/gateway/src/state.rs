use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::{Duration, Instant},
};

use {
    lrcom_config::LrcomConfig,
    lrcom_protocol::{Receipt, ServerFrame},
    tokio::sync::{Mutex, mpsc},
    tokio_util::sync::CancellationToken,
};

use crate::{hub::Hub, push::PushSink, rate_limit::RateWindows};

// ── Connection ───────────────────────────────────────────────────────────────

/// A WebSocket client currently registered with the hub.
#[derive(Debug)]
pub struct Connection {
    pub conn_id: String,
    pub name: Option<String>,
    /// Room the connection is a member of.
    pub room_id: Option<String>,
    /// Room the connection is queued to join (never set together with `room_id`).
    pub join_pending_room_id: Option<String>,
    pub supports_ack: bool,
    pub remote_ip: Option<String>,
    pub connected_at: Instant,
    pub last_activity: Instant,
    pub limits: RateWindows,
    pub receipts: ReceiptCache,
    /// Hello frame as first sent, re-sent reliably once acks are negotiated.
    pub hello: Option<ServerFrame>,
    /// Channel for sending serialized frames to this client's write loop.
    sender: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

impl Connection {
    pub fn new(
        conn_id: String,
        sender: mpsc::UnboundedSender<String>,
        cancel: CancellationToken,
        receipt_capacity: usize,
        now: Instant,
    ) -> Self {
        Self {
            conn_id,
            name: None,
            room_id: None,
            join_pending_room_id: None,
            supports_ack: false,
            remote_ip: None,
            connected_at: now,
            last_activity: now,
            limits: RateWindows::new(now),
            receipts: ReceiptCache::new(receipt_capacity),
            hello: None,
            sender,
            cancel,
        }
    }

    pub fn is_open(&self) -> bool {
        !self.cancel.is_cancelled() && !self.sender.is_closed()
    }

    pub fn is_named(&self) -> bool {
        self.name.is_some()
    }

    /// Send a serialized JSON frame to this client.
    pub fn send(&self, frame: &str) -> bool {
        self.sender.send(frame.to_string()).is_ok()
    }

    /// Touch the activity timestamp.
    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// Time since the socket was accepted.
    pub fn session_length(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.connected_at)
    }

    /// Ask the transport task to close the socket.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

// ── Receipt cache ────────────────────────────────────────────────────────────

/// Bounded FIFO of receipts by client correlation id, used to answer
/// retransmitted frames without re-executing them.
#[derive(Debug)]
pub struct ReceiptCache {
    entries: HashMap<String, Receipt>,
    order: VecDeque<String>,
    capacity: usize,
}

impl ReceiptCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, c_msg_id: &str) -> Option<&Receipt> {
        self.entries.get(c_msg_id)
    }

    pub fn remember(&mut self, receipt: Receipt) {
        let key = receipt.c_msg_id.clone();
        if self.entries.insert(key.clone(), receipt).is_none() {
            self.order.push_back(key);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── Gateway state ────────────────────────────────────────────────────────────

/// Shared gateway runtime state, wrapped in Arc for use across async tasks.
pub struct GatewayState {
    /// The hub core. Every mutation happens under this lock, so operations
    /// are applied one at a time.
    pub hub: Mutex<Hub>,
    pub config: LrcomConfig,
    /// Server version string.
    pub version: String,
    pub push_enabled: bool,
}

impl GatewayState {
    pub fn new(config: LrcomConfig, push: Option<Arc<dyn PushSink>>) -> Arc<Self> {
        let push_enabled = push.is_some();
        Arc::new(Self {
            hub: Mutex::new(Hub::new(config.clone(), push)),
            config,
            version: env!("CARGO_PKG_VERSION").to_string(),
            push_enabled,
        })
    }

    pub async fn connection_count(&self) -> usize {
        self.hub.lock().await.connection_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt(c: &str, ok: bool) -> Receipt {
        Receipt {
            c_msg_id: c.into(),
            msg_id: format!("receipt:{c}"),
            ok,
            code: None,
            at_iso: "t".into(),
        }
    }

    #[test]
    fn receipt_cache_evicts_oldest_first() {
        let mut cache = ReceiptCache::new(2);
        cache.remember(receipt("a", true));
        cache.remember(receipt("b", true));
        cache.remember(receipt("c", false));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(!cache.get("c").unwrap().ok);
    }

    #[test]
    fn re_remembering_does_not_grow_order() {
        let mut cache = ReceiptCache::new(2);
        cache.remember(receipt("a", true));
        cache.remember(receipt("a", false));
        cache.remember(receipt("b", true));
        assert_eq!(cache.len(), 2);
        assert!(!cache.get("a").unwrap().ok);
    }

    #[test]
    fn connection_open_until_closed_or_receiver_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Connection::new("c1".into(), tx, CancellationToken::new(), 8, Instant::now());
        assert!(conn.is_open());
        assert!(conn.send("{}"));
        conn.close();
        assert!(!conn.is_open());
        drop(rx);
        assert!(!conn.send("{}"));
    }

    #[test]
    fn session_length_counts_from_accept() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let t0 = Instant::now();
        let conn = Connection::new("c1".into(), tx, CancellationToken::new(), 8, t0);
        assert_eq!(conn.session_length(t0 + Duration::from_secs(90)), Duration::from_secs(90));
        assert_eq!(conn.session_length(t0), Duration::ZERO);
    }
}
