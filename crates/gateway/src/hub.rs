//! The coordination hub: one synchronous state machine that owns every
//! connection, name, room and pending envelope.
//!
//! Transport tasks hand it inbound text and timers drive it with explicit
//! instants. It never awaits, so holding the state lock across a call keeps
//! operations strictly ordered.
//!
//! Inbound pipeline for one text frame:
//! 1. touch the activity timestamp
//! 2. parse the envelope (`type`, `cMsgId`)
//! 3. replay the cached receipt for a repeated `cMsgId` and stop
//! 4. rate-limit by traffic class
//! 5. decode into a [`ClientFrame`] and dispatch
//! 6. answer with a receipt when the frame carried a `cMsgId`

use std::{collections::HashMap, sync::Arc, time::Instant};

use {
    lrcom_config::LrcomConfig,
    lrcom_protocol::{
        ClientFeatures, ClientFrame, HELLO_COALESCE_KEY, PushSubscription, RawFrame, Receipt,
        ServerFrame, VoiceStats, receipt_key,
    },
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    capacity,
    error::{OpError, OpResult},
    push::PushSink,
    reliable::{DeliveryFailure, Envelope, Outbox, RetryPolicy, reliable_payload},
    rooms::Room,
    state::Connection,
    turn,
};

pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// How a single frame should be delivered to a reliable-capable client.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub msg_id: Option<String>,
    /// Coalescing key; a newer frame with the same key replaces the pending one.
    pub key: Option<String>,
    pub policy: Option<RetryPolicy>,
    pub on_failure: Option<DeliveryFailure>,
}

impl SendOptions {
    pub fn keyed(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            ..Self::default()
        }
    }

    pub fn with_msg_id(mut self, msg_id: impl Into<String>) -> Self {
        self.msg_id = Some(msg_id.into());
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn on_failure(mut self, failure: DeliveryFailure) -> Self {
        self.on_failure = Some(failure);
        self
    }
}

pub struct Hub {
    pub(crate) config: LrcomConfig,
    pub(crate) connections: HashMap<String, Connection>,
    /// Claimed display name → owning connection.
    pub(crate) names: HashMap<String, String>,
    pub(crate) rooms: HashMap<String, Room>,
    pub(crate) outbox: Outbox,
    pub(crate) push_subscriptions: HashMap<String, PushSubscription>,
    pub(crate) push: Option<Arc<dyn PushSink>>,
    default_policy: RetryPolicy,
    /// Instant of the operation currently being applied.
    pub(crate) now: Instant,
}

impl Hub {
    pub fn new(config: LrcomConfig, push: Option<Arc<dyn PushSink>>) -> Self {
        Self {
            default_policy: RetryPolicy::from_config(&config.reliable),
            config,
            connections: HashMap::new(),
            names: HashMap::new(),
            rooms: HashMap::new(),
            outbox: Outbox::default(),
            push_subscriptions: HashMap::new(),
            push,
            now: Instant::now(),
        }
    }

    pub fn config(&self) -> &LrcomConfig {
        &self.config
    }

    pub fn connection(&self, conn_id: &str) -> Option<&Connection> {
        self.connections.get(conn_id)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn active_calls(&self) -> usize {
        self.rooms.values().filter(|r| r.members.len() >= 2).count()
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn voice_stats(&self) -> VoiceStats {
        capacity::voice_stats(
            self.rooms.values().map(|r| r.members.len()),
            &self.config.turn,
        )
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Register a freshly accepted socket and greet it with `hello`.
    pub fn connect(
        &mut self,
        sender: mpsc::UnboundedSender<String>,
        cancel: CancellationToken,
        remote_ip: Option<String>,
        now: Instant,
    ) -> String {
        self.now = now;
        let conn_id = new_id();
        let hello = ServerFrame::Hello {
            id: conn_id.clone(),
            turn: turn::ice_config(&self.config.turn, turn::unix_now()),
            https: true,
            client_ip: remote_ip.clone(),
            turn_warning: turn::localhost_warning(&self.config.turn, remote_ip.as_deref()),
            voice: self.voice_stats(),
        };

        let mut conn = Connection::new(
            conn_id.clone(),
            sender,
            cancel,
            self.config.limits.receipt_cache_size,
            now,
        );
        let remote_ip_label = remote_ip.clone().unwrap_or_else(|| "-".into());
        conn.remote_ip = remote_ip;
        conn.hello = Some(hello.clone());
        self.connections.insert(conn_id.clone(), conn);
        self.send(&conn_id, &hello);

        info!(
            conn_id = %conn_id,
            remote_ip = %remote_ip_label,
            connections = self.connections.len(),
            "connection opened"
        );
        conn_id
    }

    /// Tear a connection down: leave its room, withdraw its join request,
    /// release its name and drop its pending envelopes. Idempotent.
    pub fn disconnect(&mut self, conn_id: &str) {
        if !self.connections.contains_key(conn_id) {
            return;
        }
        self.leave_room(conn_id);
        self.withdraw_join(conn_id, None);

        let Some(conn) = self.connections.remove(conn_id) else {
            return;
        };
        conn.close();
        if let Some(name) = &conn.name
            && self.names.get(name).is_some_and(|owner| owner == conn_id)
        {
            self.names.remove(name);
        }
        self.push_subscriptions.remove(conn_id);

        for envelope in self.outbox.purge(conn_id) {
            if let Some(failure) = envelope.on_failure {
                self.handle_delivery_failure(failure);
            }
        }

        info!(
            conn_id,
            name = conn.name.as_deref().unwrap_or("-"),
            remote_ip = conn.remote_ip.as_deref().unwrap_or("-"),
            session = ?conn.session_length(self.now),
            connections = self.connections.len(),
            "connection closed"
        );
        if let Some(name) = &conn.name {
            self.broadcast_system(&format!("{name} left."));
        }
        self.broadcast_presence();
    }

    // ── Inbound ──────────────────────────────────────────────────────────────

    /// Record transport-level activity (WebSocket ping/pong).
    pub fn touch(&mut self, conn_id: &str, now: Instant) {
        if let Some(conn) = self.connections.get_mut(conn_id) {
            conn.touch(now);
        }
    }

    pub fn handle_text(&mut self, conn_id: &str, text: &str, now: Instant) {
        self.now = now;
        let Some(conn) = self.connections.get_mut(conn_id) else {
            return;
        };
        conn.touch(now);

        let raw = match RawFrame::parse(text) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(conn_id, code = e.code(), "rejecting unparseable frame");
                self.send(conn_id, &ServerFrame::error(e.code()));
                return;
            },
        };
        let c_msg_id = raw.c_msg_id.clone();

        if let Some(c) = c_msg_id.as_deref()
            && self.replay_receipt(conn_id, c)
        {
            return;
        }

        let result = if self.admit(conn_id, &raw.kind, now) {
            match raw.decode() {
                Ok(frame) => self.dispatch(conn_id, frame),
                Err(e) => self.reject(conn_id, OpError::Decode(e)),
            }
        } else {
            debug!(conn_id, kind = %raw.kind, "rate limited");
            self.reject(conn_id, OpError::RateLimited)
        };

        if let Some(c) = c_msg_id
            && !matches!(result, Err(OpError::Dropped))
        {
            self.send_receipt(conn_id, c, &result);
        }
    }

    fn admit(&mut self, conn_id: &str, kind: &str, now: Instant) -> bool {
        let limits = &self.config.limits;
        self.connections
            .get_mut(conn_id)
            .is_some_and(|conn| conn.limits.admit(kind, now, limits))
    }

    fn dispatch(&mut self, conn_id: &str, frame: ClientFrame) -> OpResult {
        if requires_name(&frame) && !self.is_named(conn_id) {
            return self.reject(conn_id, OpError::NoName);
        }

        match frame {
            ClientFrame::SetName { name } => self.set_name(conn_id, name.as_deref()),
            ClientFrame::ChatSend { text, to_name } => {
                self.chat_send(conn_id, text.as_deref(), to_name.as_deref())
            },
            ClientFrame::CallStart { to } => self.start_call(conn_id, to.as_deref()),
            ClientFrame::CallAccept { from, room_id } => {
                self.accept_call(conn_id, from.as_deref(), room_id.as_deref())
            },
            ClientFrame::CallReject { from, room_id } => {
                self.reject_call(conn_id, from.as_deref(), room_id.as_deref())
            },
            ClientFrame::CallHangup => self.hangup(conn_id),
            ClientFrame::CallJoinRequest { to } => self.request_join(conn_id, to.as_deref()),
            ClientFrame::CallJoinCancel => self.cancel_join(conn_id),
            ClientFrame::CallJoinAccept { from, room_id } => {
                self.answer_join(conn_id, from.as_deref(), room_id.as_deref(), true)
            },
            ClientFrame::CallJoinReject { from, room_id } => {
                self.answer_join(conn_id, from.as_deref(), room_id.as_deref(), false)
            },
            ClientFrame::Signal { to, payload } => {
                self.relay_signal(conn_id, to.as_deref(), payload.unwrap_or_default())
            },
            ClientFrame::Ack { msg_id } => {
                if let Some(msg_id) = msg_id {
                    self.outbox.ack(conn_id, &msg_id);
                }
                Ok(())
            },
            ClientFrame::Ping => {
                self.send(conn_id, &ServerFrame::Pong {
                    at: chrono::Utc::now().timestamp_millis(),
                });
                Ok(())
            },
            ClientFrame::ClientHello { features } => self.client_hello(conn_id, features),
            ClientFrame::PushSubscribe { subscription } => {
                self.push_subscribe(conn_id, subscription)
            },
            ClientFrame::PushUnsubscribe => self.push_unsubscribe(conn_id),
        }
    }

    /// Answer with `error { code }` and fail the operation.
    pub(crate) fn reject(&mut self, conn_id: &str, err: OpError) -> OpResult {
        self.send(conn_id, &ServerFrame::error(err.code()));
        Err(err)
    }

    pub(crate) fn is_named(&self, conn_id: &str) -> bool {
        self.connections.get(conn_id).is_some_and(Connection::is_named)
    }

    fn client_hello(&mut self, conn_id: &str, features: Option<ClientFeatures>) -> OpResult {
        let wants_ack = features.is_some_and(|f| f.ack);
        let Some(conn) = self.connections.get_mut(conn_id) else {
            return Ok(());
        };
        conn.supports_ack = wants_ack;
        let hello = conn.hello.clone();
        if wants_ack && let Some(hello) = hello {
            debug!(conn_id, "client negotiated acknowledgements");
            self.send_with(conn_id, &hello, SendOptions::keyed(HELLO_COALESCE_KEY));
        }
        Ok(())
    }

    // ── Receipts ─────────────────────────────────────────────────────────────

    fn replay_receipt(&mut self, conn_id: &str, c_msg_id: &str) -> bool {
        let Some(receipt) = self
            .connections
            .get(conn_id)
            .and_then(|conn| conn.receipts.get(c_msg_id))
            .cloned()
        else {
            return false;
        };
        debug!(conn_id, c_msg_id, "replaying cached receipt");
        self.deliver_receipt(conn_id, receipt);
        true
    }

    fn send_receipt(&mut self, conn_id: &str, c_msg_id: String, result: &OpResult) {
        let receipt = Receipt {
            msg_id: receipt_key(&c_msg_id),
            ok: result.is_ok(),
            code: result.as_ref().err().map(|e| e.code().to_string()),
            at_iso: now_iso(),
            c_msg_id,
        };
        if let Some(conn) = self.connections.get_mut(conn_id) {
            conn.receipts.remember(receipt.clone());
        }
        self.deliver_receipt(conn_id, receipt);
    }

    fn deliver_receipt(&mut self, conn_id: &str, receipt: Receipt) {
        let key = receipt.msg_id.clone();
        self.send_with(
            conn_id,
            &ServerFrame::Receipt(receipt),
            SendOptions::keyed(key.clone()).with_msg_id(key),
        );
    }

    // ── Outbound ─────────────────────────────────────────────────────────────

    /// Fire-and-forget send, used for high-rate or state-refresh traffic.
    pub fn send_best_effort(&self, conn_id: &str, frame: &ServerFrame) -> bool {
        let Some(conn) = self.connections.get(conn_id).filter(|c| c.is_open()) else {
            return false;
        };
        match serde_json::to_string(frame) {
            Ok(text) => conn.send(&text),
            Err(e) => {
                warn!(conn_id, error = %e, "failed to serialize frame");
                false
            },
        }
    }

    /// Reliable when the client negotiated acks, best-effort otherwise.
    pub fn send(&mut self, conn_id: &str, frame: &ServerFrame) -> bool {
        self.send_with(conn_id, frame, SendOptions::default())
    }

    pub fn send_with(&mut self, conn_id: &str, frame: &ServerFrame, opts: SendOptions) -> bool {
        let Some(conn) = self.connections.get(conn_id).filter(|c| c.is_open()) else {
            return false;
        };
        if !conn.supports_ack {
            return self.send_best_effort(conn_id, frame);
        }

        let msg_id = opts
            .msg_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let Some(payload) = reliable_payload(frame, &msg_id) else {
            return false;
        };
        let sent = conn.send(&payload);
        let policy = opts.policy.unwrap_or(self.default_policy);
        self.outbox.track(conn_id, Envelope {
            key: opts.key.unwrap_or_else(|| msg_id.clone()),
            msg_id,
            payload,
            attempts: 1,
            next_at: policy.next_at(self.now, 1),
            policy,
            on_failure: opts.on_failure,
        });
        sent
    }

    // ── Timers ───────────────────────────────────────────────────────────────

    /// Retransmit due envelopes to open, ack-capable recipients and run the
    /// failure handling of exhausted ones.
    pub fn pump_retries(&mut self, now: Instant) {
        self.now = now;
        for recipient in self.outbox.recipients() {
            let Some(conn) = self
                .connections
                .get(&recipient)
                .filter(|c| c.is_open() && c.supports_ack)
            else {
                continue;
            };
            let pass = self.outbox.take_due(&recipient, now);
            for payload in &pass.resend {
                conn.send(payload);
            }
            for envelope in pass.exhausted {
                debug!(
                    conn_id = %recipient,
                    msg_id = %envelope.msg_id,
                    attempts = envelope.attempts,
                    "reliable delivery gave up"
                );
                if let Some(failure) = envelope.on_failure {
                    self.handle_delivery_failure(failure);
                }
            }
        }
    }

    /// Terminate connections that have been silent past the staleness
    /// threshold. Returns the terminated ids.
    pub fn sweep_stale(&mut self, now: Instant) -> Vec<String> {
        self.now = now;
        let threshold = self.config.presence.stale_timeout();
        let stale: Vec<String> = self
            .connections
            .values()
            .filter(|c| now.saturating_duration_since(c.last_activity) > threshold)
            .map(|c| c.conn_id.clone())
            .collect();
        for conn_id in &stale {
            warn!(conn_id = %conn_id, "terminating stale connection");
            self.disconnect(conn_id);
        }
        stale
    }

    pub fn presence_tick(&mut self, now: Instant) {
        self.now = now;
        self.broadcast_presence();
    }

    fn handle_delivery_failure(&mut self, failure: DeliveryFailure) {
        match failure {
            DeliveryFailure::PrivateMessage {
                sender_id,
                recipient_name,
            } => self.notify_delivery_failed(&sender_id, &recipient_name),
        }
    }
}

fn requires_name(frame: &ClientFrame) -> bool {
    !matches!(
        frame,
        ClientFrame::SetName { .. }
            | ClientFrame::ClientHello { .. }
            | ClientFrame::Ack { .. }
            | ClientFrame::Ping
            | ClientFrame::PushSubscribe { .. }
            | ClientFrame::PushUnsubscribe
    )
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::test_support::{TestClient, hub, hub_with},
        serde_json::json,
        std::time::Duration,
    };

    #[test]
    fn connect_sends_hello_with_ice_config() {
        let mut hub = hub();
        let now = Instant::now();
        let mut ann = TestClient::connect(&mut hub, now);
        let hello = ann.take_type("hello");
        assert_eq!(hello.len(), 1);
        assert_eq!(hello[0]["id"], ann.id.as_str());
        assert_eq!(hello[0]["https"], true);
        assert!(hello[0]["turn"]["iceServers"].is_array());
        assert!(hello[0].get("msgId").is_none());
    }

    #[test]
    fn parse_failures_answer_with_error_only() {
        let mut hub = hub();
        let now = Instant::now();
        let mut ann = TestClient::connect(&mut hub, now);
        ann.drain();

        hub.handle_text(&ann.id, "{not json", now);
        hub.handle_text(&ann.id, r#"{"cMsgId":"c1"}"#, now);
        let frames = ann.drain();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], json!({"type": "error", "code": "BAD_JSON"}));
        assert_eq!(frames[1], json!({"type": "error", "code": "BAD_MESSAGE"}));
    }

    #[test]
    fn unknown_and_malformed_kinds_get_failing_receipts() {
        let mut hub = hub();
        let now = Instant::now();
        let mut ann = TestClient::named(&mut hub, "Ann", now);

        ann.send(&mut hub, json!({"type": "teleport", "cMsgId": "c1"}), now);
        ann.send(&mut hub, json!({"type": "callStart", "to": 5, "cMsgId": "c2"}), now);

        let errors = ann.take_type("error");
        assert_eq!(errors[0]["code"], "UNKNOWN_TYPE");
        assert_eq!(errors[1]["code"], "BAD_MESSAGE");
        let receipts = ann.take_type("receipt");
        assert_eq!(receipts[0]["code"], "UNKNOWN_TYPE");
        assert_eq!(receipts[1]["code"], "BAD_MESSAGE");
        assert_eq!(receipts[1]["ok"], false);
    }

    #[test]
    fn operations_require_a_name() {
        let mut hub = hub();
        let now = Instant::now();
        let mut ann = TestClient::connect(&mut hub, now);
        ann.drain();

        ann.send(&mut hub, json!({"type": "chatSend", "text": "hi", "cMsgId": "c1"}), now);
        ann.send(&mut hub, json!({"type": "ping"}), now);

        let frames = ann.drain();
        assert_eq!(frames[0], json!({"type": "error", "code": "NO_NAME"}));
        assert_eq!(frames[1]["type"], "receipt");
        assert_eq!(frames[1]["code"], "NO_NAME");
        assert_eq!(frames[2]["type"], "pong");
    }

    #[test]
    fn repeated_correlation_id_replays_identical_receipt() {
        let mut hub = hub();
        let now = Instant::now();
        let mut ann = TestClient::reliable(&mut hub, "Ann", now);
        let mut bob = TestClient::named(&mut hub, "Bob", now);
        ann.drain();
        bob.drain();

        let frame = json!({"type": "chatSend", "text": "once", "cMsgId": "c-7"});
        ann.send(&mut hub, frame.clone(), now);
        let first: Vec<String> = ann
            .drain_raw()
            .into_iter()
            .filter(|raw| raw.contains("\"receipt\""))
            .collect();
        ann.send(&mut hub, frame, now + Duration::from_millis(10));
        let second = ann.drain_raw();

        assert_eq!(first.len(), 1);
        assert_eq!(second, first);
        // The side effect happened only once.
        assert_eq!(bob.take_type("chat").len(), 1);
    }

    #[test]
    fn receipt_is_coalesced_per_correlation_id() {
        let mut hub = hub();
        let now = Instant::now();
        let ann = TestClient::reliable(&mut hub, "Ann", now);
        ann.send(&mut hub, json!({"type": "ping", "cMsgId": "p1"}), now);
        ann.send(&mut hub, json!({"type": "ping", "cMsgId": "p1"}), now);

        let keys: Vec<&str> = hub
            .outbox()
            .pending(&ann.id)
            .iter()
            .map(|e| e.key.as_str())
            .filter(|k| k.starts_with("receipt:"))
            .collect();
        assert_eq!(keys, vec!["receipt:p1"]);
    }

    #[test]
    fn presence_tick_resends_roster_to_named_connections() {
        let mut hub = hub();
        let t0 = Instant::now();
        let mut ann = TestClient::named(&mut hub, "Ann", t0);
        let mut bob = TestClient::named(&mut hub, "Bob", t0);
        let mut anon = TestClient::connect(&mut hub, t0);
        ann.drain();
        bob.drain();
        anon.drain();

        // Unchanged state is still re-sent on every tick.
        for n in 1..=2u64 {
            hub.presence_tick(t0 + Duration::from_secs(10 * n));
            let roster = ann.take_type("presence");
            assert_eq!(roster.len(), 1);
            let names: Vec<&str> = roster[0]["users"]
                .as_array()
                .unwrap()
                .iter()
                .map(|u| u["name"].as_str().unwrap())
                .collect();
            assert_eq!(names, vec!["Ann", "Bob"]);
            assert_eq!(roster[0]["users"][0]["busy"], false);
            assert_eq!(bob.take_type("presence").len(), 1);
        }
        assert!(anon.take_type("presence").is_empty());

        ann.send(&mut hub, json!({"type": "callStart", "to": bob.id}), t0);
        ann.drain();
        hub.presence_tick(t0 + Duration::from_secs(30));
        let roster = ann.take_type("presence").remove(0);
        assert!(roster["users"].as_array().unwrap().iter().all(|u| u["busy"] == true));
    }

    #[test]
    fn reliable_frames_carry_msg_id_until_acked() {
        let mut hub = hub();
        let t0 = Instant::now();
        let mut ann = TestClient::reliable(&mut hub, "Ann", t0);
        ann.drain();

        ann.send(&mut hub, json!({"type": "ping"}), t0);
        let pong = ann.take_type("pong").remove(0);
        assert_eq!(pong["reliable"], true);
        let msg_id = pong["msgId"].as_str().unwrap().to_string();

        hub.pump_retries(t0 + Duration::from_millis(800));
        let resent = ann.take_type("pong");
        assert_eq!(resent.len(), 1);
        assert_eq!(resent[0]["msgId"], msg_id.as_str());

        ann.send(&mut hub, json!({"type": "ack", "msgId": msg_id}), t0);
        hub.pump_retries(t0 + Duration::from_secs(60));
        assert!(ann.take_type("pong").is_empty());
    }

    #[test]
    fn exhausted_envelopes_are_dropped() {
        let mut hub = hub();
        let t0 = Instant::now();
        let mut ann = TestClient::reliable(&mut hub, "Ann", t0);
        ann.send(&mut hub, json!({"type": "ping"}), t0);
        ann.drain();

        let mut sends = 1;
        let mut at = t0;
        for _ in 0..20 {
            at += Duration::from_secs(10);
            hub.pump_retries(at);
            sends += ann.take_type("pong").len();
        }
        assert_eq!(sends, 5);
        assert!(hub.outbox().pending(&ann.id).is_empty());
    }

    #[test]
    fn best_effort_clients_get_plain_frames() {
        let mut hub = hub();
        let now = Instant::now();
        let mut ann = TestClient::named(&mut hub, "Ann", now);
        ann.send(&mut hub, json!({"type": "ping"}), now);
        let pong = ann.take_type("pong").remove(0);
        assert!(pong.get("msgId").is_none());
        assert!(hub.outbox().pending(&ann.id).is_empty());
    }

    #[test]
    fn client_hello_resends_hello_reliably() {
        let mut hub = hub();
        let now = Instant::now();
        let mut ann = TestClient::connect(&mut hub, now);
        ann.drain();
        ann.send(&mut hub, json!({"type": "clientHello", "features": {"ack": true}}), now);
        ann.send(&mut hub, json!({"type": "clientHello", "features": {"ack": true}}), now);

        let hellos = ann.take_type("hello");
        assert_eq!(hellos.len(), 2);
        assert_eq!(hellos[1]["reliable"], true);
        let pending = hub.outbox().pending(&ann.id);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].key, "hello");
    }

    #[test]
    fn stale_connections_are_swept() {
        let mut config = LrcomConfig::default();
        config.presence.stale_timeout_ms = 1_000;
        let mut hub = hub_with(config);
        let t0 = Instant::now();
        let ann = TestClient::named(&mut hub, "Ann", t0);
        let mut bob = TestClient::named(&mut hub, "Bob", t0);
        bob.send(&mut hub, json!({"type": "ping"}), t0 + Duration::from_millis(900));
        bob.drain();

        let swept = hub.sweep_stale(t0 + Duration::from_millis(1_500));
        assert_eq!(swept, vec![ann.id.clone()]);
        assert!(ann.cancel.is_cancelled());
        assert!(hub.connection(&ann.id).is_none());

        let left: Vec<_> = bob
            .take_type("chat")
            .into_iter()
            .filter(|c| c["text"] == "Ann left.")
            .collect();
        assert_eq!(left.len(), 1);
    }

    #[test]
    fn disconnect_is_idempotent() {
        let mut hub = hub();
        let now = Instant::now();
        let ann = TestClient::named(&mut hub, "Ann", now);
        let mut bob = TestClient::named(&mut hub, "Bob", now);
        bob.drain();
        hub.disconnect(&ann.id);
        hub.disconnect(&ann.id);
        assert_eq!(bob.take_type("chat").len(), 1);
        assert_eq!(hub.connection_count(), 1);
    }

    #[test]
    fn flood_of_signals_is_limited_but_hangup_gets_through() {
        let mut hub = hub();
        let now = Instant::now();
        let mut ann = TestClient::named(&mut hub, "Ann", now);
        let mut bob = TestClient::named(&mut hub, "Bob", now);
        ann.send(&mut hub, json!({"type": "callStart", "to": bob.id}), now);
        let room_id = bob.room_id(&hub);
        bob.send(
            &mut hub,
            json!({"type": "callAccept", "from": ann.id, "roomId": room_id}),
            now,
        );
        ann.drain();
        bob.drain();

        for _ in 0..300 {
            ann.send(&mut hub, json!({"type": "signal", "to": bob.id, "payload": {}}), now);
        }
        let errors = ann.take_type("error");
        assert_eq!(errors.len(), 50);
        assert!(errors.iter().all(|e| e["code"] == "RATE_LIMIT"));
        assert_eq!(bob.take_type("signal").len(), 250);

        ann.send(&mut hub, json!({"type": "callHangup", "cMsgId": "h1"}), now);
        let receipt = ann.take_type("receipt").remove(0);
        assert_eq!(receipt["ok"], true);
        assert!(hub.connection(&ann.id).unwrap().room_id.is_none());
        assert_eq!(bob.take_type("callEnded")[0]["reason"], "alone");
    }
}
