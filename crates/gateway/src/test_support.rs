//! Fake clients for driving the hub in unit tests.

use std::{collections::VecDeque, sync::Arc, time::Instant};

use {
    lrcom_config::LrcomConfig,
    serde_json::{Value, json},
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
};

use crate::{hub::Hub, push::PushSink};

pub(crate) fn hub() -> Hub {
    hub_with(LrcomConfig::default())
}

pub(crate) fn hub_with(config: LrcomConfig) -> Hub {
    Hub::new(config, None)
}

pub(crate) fn hub_with_push(sink: Arc<dyn PushSink>) -> Hub {
    Hub::new(LrcomConfig::default(), Some(sink))
}

/// A connection whose outbound channel is buffered for inspection.
pub(crate) struct TestClient {
    pub id: String,
    pub cancel: CancellationToken,
    rx: mpsc::UnboundedReceiver<String>,
    buffered: VecDeque<String>,
}

impl TestClient {
    pub fn connect(hub: &mut Hub, now: Instant) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let id = hub.connect(tx, cancel.clone(), Some("127.0.0.1".into()), now);
        Self {
            id,
            cancel,
            rx,
            buffered: VecDeque::new(),
        }
    }

    /// Connected, named, best-effort client with an empty inbox.
    pub fn named(hub: &mut Hub, name: &str, now: Instant) -> Self {
        let mut client = Self::connect(hub, now);
        client.send(hub, json!({"type": "setName", "name": name}), now);
        assert_eq!(client.take_type("nameResult")[0]["ok"], true);
        client.drain();
        client
    }

    /// Like [`TestClient::named`] but ack-capable, with nothing left pending.
    pub fn reliable(hub: &mut Hub, name: &str, now: Instant) -> Self {
        let mut client = Self::connect(hub, now);
        client.send(
            hub,
            json!({"type": "clientHello", "features": {"ack": true}}),
            now,
        );
        client.send(hub, json!({"type": "setName", "name": name}), now);
        client.ack_all(hub, now);
        client.drain();
        client
    }

    pub fn send(&self, hub: &mut Hub, frame: Value, now: Instant) {
        hub.handle_text(&self.id, &frame.to_string(), now);
    }

    /// Acknowledge everything the hub is waiting on for this client.
    pub fn ack_all(&self, hub: &mut Hub, now: Instant) {
        let ids: Vec<String> = hub
            .outbox()
            .pending(&self.id)
            .iter()
            .map(|e| e.msg_id.clone())
            .collect();
        for id in ids {
            self.send(hub, json!({"type": "ack", "msgId": id}), now);
        }
    }

    pub fn room_id(&self, hub: &Hub) -> Option<String> {
        hub.connection(&self.id).and_then(|c| c.room_id.clone())
    }

    fn pull(&mut self) {
        while let Ok(text) = self.rx.try_recv() {
            self.buffered.push_back(text);
        }
    }

    pub fn drain_raw(&mut self) -> Vec<String> {
        self.pull();
        self.buffered.drain(..).collect()
    }

    pub fn drain(&mut self) -> Vec<Value> {
        self.drain_raw()
            .iter()
            .map(|raw| serde_json::from_str(raw).unwrap())
            .collect()
    }

    /// Remove and return frames of one type, keeping the rest buffered.
    pub fn take_type(&mut self, kind: &str) -> Vec<Value> {
        self.pull();
        let mut taken = Vec::new();
        let mut kept = VecDeque::new();
        for raw in self.buffered.drain(..) {
            let value: Value = serde_json::from_str(&raw).unwrap();
            if value["type"] == kind {
                taken.push(value);
            } else {
                kept.push_back(raw);
            }
        }
        self.buffered = kept;
        taken
    }
}
